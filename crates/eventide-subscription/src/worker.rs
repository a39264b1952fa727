//! Catch-up subscription worker.
//!
//! A worker reads the whole log from its last checkpoint, forwards each
//! event to the event bus and then to the projections, and only then
//! advances the checkpoint. A crash between forwarding and checkpointing
//! redelivers the event on restart, so delivery is at-least-once.
//!
//! Subscription drops are retried forever after a fixed backoff, resuming
//! after the last position seen on the dropped subscription. Any error while
//! handling an individual event stops the worker.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use eventide_core::bus::EventBus;
use eventide_core::checkpoint::{CHECKPOINT_STORED_EVENT_TYPE, Checkpoint, CheckpointRepository};
use eventide_core::error::DomainError;
use eventide_core::event::StreamEvent;
use eventide_core::projection::ProjectionPublisher;
use eventide_core::serializer::{EventSerializer, JsonEventSerializer};
use eventide_core::store::RecordedEvent;
use eventide_core::subscription::LogSubscriber;

use crate::config::{MIN_BACKOFF, SubscriptionConfig};

/// Lifecycle of a [`SubscriptionWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not running.
    Idle,
    /// Opening a subscription.
    Subscribing,
    /// Receiving events.
    Streaming,
    /// The subscription dropped; waiting out the backoff.
    Dropped,
    /// The run loop has exited.
    Stopped,
}

/// Drives one named catch-up subscription.
pub struct SubscriptionWorker<S = JsonEventSerializer> {
    subscriber: Arc<dyn LogSubscriber>,
    checkpoints: Arc<dyn CheckpointRepository>,
    publisher: Arc<dyn ProjectionPublisher>,
    bus: Arc<dyn EventBus>,
    serializer: S,
    config: SubscriptionConfig,
    state: watch::Sender<WorkerState>,
}

impl SubscriptionWorker {
    /// Creates an idle worker using the JSON codec.
    #[must_use]
    pub fn new(
        subscriber: Arc<dyn LogSubscriber>,
        checkpoints: Arc<dyn CheckpointRepository>,
        publisher: Arc<dyn ProjectionPublisher>,
        bus: Arc<dyn EventBus>,
        config: SubscriptionConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            subscriber,
            checkpoints,
            publisher,
            bus,
            serializer: JsonEventSerializer,
            config,
            state,
        }
    }
}

impl<S: EventSerializer + 'static> SubscriptionWorker<S> {
    /// Replaces the codec used to decode log records.
    #[must_use]
    pub fn with_serializer<T: EventSerializer>(self, serializer: T) -> SubscriptionWorker<T> {
        SubscriptionWorker {
            subscriber: self.subscriber,
            checkpoints: self.checkpoints,
            publisher: self.publisher,
            bus: self.bus,
            serializer,
            config: self.config,
            state: self.state,
        }
    }

    /// The worker's configuration.
    #[must_use]
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Runs the worker on a new task and returns a handle to it.
    #[must_use]
    pub fn spawn(self) -> SubscriptionHandle {
        let cancel = CancellationToken::new();
        let state = self.state.subscribe();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        SubscriptionHandle {
            cancel,
            state,
            task,
        }
    }

    /// Runs until `cancel` fires or an event cannot be handled.
    ///
    /// # Errors
    ///
    /// Returns the checkpoint repository's error if the starting position
    /// cannot be loaded, or the error raised while deserializing,
    /// publishing or checkpointing an event.
    #[instrument(skip_all, fields(subscription_id = %self.config.subscription_id))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DomainError> {
        let result = self.run_loop(&cancel).await;
        match &result {
            Ok(()) => info!("subscription stopped"),
            Err(e) => error!(error = %e, "subscription failed"),
        }
        self.set_state(WorkerState::Stopped);
        result
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        let checkpoint = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            loaded = self.checkpoints.load(&self.config.subscription_id) => loaded?,
        };
        info!(checkpoint, "starting subscription");

        let filter = self.config.filter();
        let mut last_position = checkpoint;
        loop {
            self.set_state(WorkerState::Subscribing);
            let after = (last_position > 0).then_some(last_position);
            let subscribed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                result = self.subscriber.subscribe_to_all(after, &filter) => result,
            };

            match subscribed {
                Ok(mut subscription) => {
                    self.set_state(WorkerState::Streaming);
                    debug!(?after, "subscribed");
                    loop {
                        let next = tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Ok(()),
                            next = subscription.next() => next,
                        };
                        match next {
                            Some(Ok(record)) => {
                                self.handle_event(&record).await?;
                                last_position = record.position;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, last_position, "subscription dropped");
                                break;
                            }
                            None => {
                                warn!(last_position, "subscription ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, last_position, "subscribe failed"),
            }

            self.set_state(WorkerState::Dropped);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.backoff.max(MIN_BACKOFF)) => {}
            }
        }
    }

    async fn handle_event(&self, record: &RecordedEvent) -> Result<(), DomainError> {
        if record.event_type == CHECKPOINT_STORED_EVENT_TYPE || record.data.is_empty() {
            trace!(position = record.position, event_type = %record.event_type, "skipping record");
            return Ok(());
        }

        let event: StreamEvent = self.serializer.deserialize(record)?;
        self.bus.publish(&event).await?;
        self.publisher.publish(&event).await?;
        self.checkpoints
            .store(Checkpoint {
                subscription_id: &self.config.subscription_id,
                position: record.position,
            })
            .await?;

        debug!(
            position = record.position,
            stream = %record.stream_name,
            event_type = %record.event_type,
            "handled event"
        );
        Ok(())
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

/// Handle to a worker running on its own task.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<Result<(), DomainError>>,
}

impl SubscriptionHandle {
    /// Current lifecycle state of the worker.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Returns `true` once the worker task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the worker to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionHandle::join`].
    pub async fn shutdown(self) -> Result<(), DomainError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the worker to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the worker, or
    /// `DomainError::Infrastructure` if its task panicked.
    pub async fn join(self) -> Result<(), DomainError> {
        self.task.await.map_err(|e| {
            DomainError::Infrastructure(format!("subscription worker task failed: {e}"))
        })?
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventide_test_support::{
        FailingEventStore, InMemoryCheckpointRepository, RecordingEventBus,
    };

    use super::*;
    use crate::projection_publisher::SequentialProjectionPublisher;

    fn worker(subscriber: Arc<dyn LogSubscriber>) -> SubscriptionWorker {
        SubscriptionWorker::new(
            subscriber,
            Arc::new(InMemoryCheckpointRepository::new()),
            Arc::new(SequentialProjectionPublisher::new()),
            Arc::new(RecordingEventBus::new()),
            SubscriptionConfig::new("test").with_backoff(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_new_worker_is_idle() {
        let worker = worker(Arc::new(FailingEventStore));

        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_stops_immediately() {
        let worker = worker(Arc::new(FailingEventStore));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = worker.run(cancel).await;

        assert!(result.is_ok());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_refused_subscriptions_are_retried_until_cancelled() {
        // Arrange
        let handle = worker(Arc::new(FailingEventStore)).spawn();
        let mut states = handle.watch_state();

        // Act
        let dropped = tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == WorkerState::Dropped),
        )
        .await;

        // Assert
        assert!(dropped.is_ok());
        drop(dropped);
        assert!(!handle.is_finished());
        handle.shutdown().await.unwrap();
    }
}
