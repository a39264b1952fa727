//! Catch-up subscriptions over the whole log.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DomainError;
use crate::store::RecordedEvent;

/// Stream of recorded events in global order. An `Err` item means the
/// subscription dropped; no further items follow it.
pub type EventSubscription = BoxStream<'static, Result<RecordedEvent, DomainError>>;

/// Which log records a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Only streams starting with one of these prefixes; empty means all.
    pub stream_prefixes: Vec<String>,
    /// Skip records whose event type starts with `$`.
    pub exclude_system_events: bool,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            stream_prefixes: Vec::new(),
            exclude_system_events: true,
        }
    }
}

impl SubscriptionFilter {
    /// Returns `true` if the record should be delivered.
    #[must_use]
    pub fn matches(&self, event: &RecordedEvent) -> bool {
        if self.exclude_system_events && event.event_type.starts_with('$') {
            return false;
        }
        self.stream_prefixes.is_empty()
            || self
                .stream_prefixes
                .iter()
                .any(|prefix| event.stream_name.as_str().starts_with(prefix.as_str()))
    }
}

/// Opens catch-up subscriptions on the backing log.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Subscribes to every matching record with a global position strictly
    /// greater than `after` (`None` starts at the beginning of the log):
    /// historical records first, then live ones as they are appended.
    async fn subscribe_to_all(
        &self,
        after: Option<u64>,
        filter: &SubscriptionFilter,
    ) -> Result<EventSubscription, DomainError>;
}
