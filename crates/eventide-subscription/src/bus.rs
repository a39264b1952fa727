//! In-process event bus built on `tokio::sync::broadcast`.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use eventide_core::bus::EventBus;
use eventide_core::error::DomainError;
use eventide_core::event::StreamEvent;

/// Default broadcast buffer capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Broadcasts every published event to all current receivers. Publishing
/// with no receiver is not an error; events published before a receiver
/// subscribed are not replayed to it.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl InMemoryEventBus {
    /// Creates a bus buffering up to `capacity` events per lagging receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns a stream of events published from now on. A receiver that
    /// falls more than `capacity` events behind gets a
    /// `DomainError::TransientConnection` item and then continues with the
    /// oldest buffered event.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, Result<StreamEvent, DomainError>> {
        BroadcastStream::new(self.tx.subscribe())
            .map(|r| r.map_err(|e| DomainError::TransientConnection(e.to_string())))
            .boxed()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: &StreamEvent) -> Result<(), DomainError> {
        let delivered = self.tx.send(event.clone()).unwrap_or(0);
        trace!(event_id = %event.event_id, delivered, "published to bus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use eventide_core::event::{DomainEvent, Metadata};
    use uuid::Uuid;

    use super::*;

    fn sample_event(position: u64) -> StreamEvent {
        let event = DomainEvent {
            event_id: Uuid::new_v4(),
            event_type: "account.opened".into(),
            occurred_at: Utc::now(),
            aggregate_id: Uuid::new_v4(),
            aggregate_sequence_number: 0,
            kind: serde_json::json!({"AccountOpened": {"owner": "Ada"}}),
        };
        let mut stream_event = StreamEvent::new(event, 0, Metadata::new());
        stream_event.position = position;
        stream_event
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_ok() {
        let bus = InMemoryEventBus::default();

        let result = bus.publish(&sample_event(1)).await;

        assert!(result.is_ok());
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_every_receiver_gets_every_event_in_order() {
        // Arrange
        let bus = InMemoryEventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        // Act
        bus.publish(&sample_event(1)).await.unwrap();
        bus.publish(&sample_event(2)).await.unwrap();

        // Assert
        for receiver in [&mut a, &mut b] {
            let first = receiver.next().await.unwrap().unwrap();
            let second = receiver.next().await.unwrap().unwrap();
            assert_eq!((first.position, second.position), (1, 2));
        }
    }

    #[tokio::test]
    async fn test_lagging_receiver_sees_transient_error() {
        let bus = InMemoryEventBus::new(1);
        let mut receiver = bus.subscribe();

        bus.publish(&sample_event(1)).await.unwrap();
        bus.publish(&sample_event(2)).await.unwrap();

        let lagged = receiver.next().await.unwrap();
        let latest = receiver.next().await.unwrap().unwrap();
        assert!(matches!(lagged, Err(DomainError::TransientConnection(_))));
        assert_eq!(latest.position, 2);
    }
}
