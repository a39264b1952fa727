//! Test subscriber: injects subscription drops into a real backing log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::subscription::{EventSubscription, LogSubscriber, SubscriptionFilter};
use futures::StreamExt;
use futures::stream;

/// What to do on the next `subscribe_to_all` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFault {
    /// Refuse to open the subscription.
    Refuse,
    /// Deliver this many events, then report a drop.
    DropAfter(usize),
}

/// Wraps a real [`LogSubscriber`] and applies scripted faults to successive
/// subscriptions. Records the `after` position of every attempt.
pub struct FlakySubscriber {
    inner: Arc<dyn LogSubscriber>,
    faults: Mutex<VecDeque<SubscribeFault>>,
    attempts: Mutex<Vec<Option<u64>>>,
}

impl FlakySubscriber {
    /// Creates a subscriber that applies `faults` to the first subscriptions
    /// in order and behaves normally afterwards.
    #[must_use]
    pub fn new(inner: Arc<dyn LogSubscriber>, faults: Vec<SubscribeFault>) -> Self {
        Self {
            inner,
            faults: Mutex::new(faults.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Returns the `after` argument of every subscription attempt.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> Vec<Option<u64>> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSubscriber for FlakySubscriber {
    async fn subscribe_to_all(
        &self,
        after: Option<u64>,
        filter: &SubscriptionFilter,
    ) -> Result<EventSubscription, DomainError> {
        self.attempts.lock().unwrap().push(after);
        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(SubscribeFault::Refuse) => Err(DomainError::TransientConnection(
                "subscription refused".into(),
            )),
            Some(SubscribeFault::DropAfter(count)) => {
                let inner = self.inner.subscribe_to_all(after, filter).await?;
                let dropped = stream::once(async {
                    Err(DomainError::TransientConnection("subscription dropped".into()))
                });
                Ok(inner.take(count).chain(dropped).boxed())
            }
            None => self.inner.subscribe_to_all(after, filter).await,
        }
    }
}
