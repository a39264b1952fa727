//! Read-model projection contracts.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::StreamEvent;

/// Derives read-optimized state from stored events.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Name used in logs and error context.
    fn name(&self) -> &str;

    /// Processes one event. Events arrive at least once and in log order.
    async fn process_event(&self, event: &StreamEvent) -> Result<(), DomainError>;
}

/// Delivers one stored event to every registered projection.
#[async_trait]
pub trait ProjectionPublisher: Send + Sync {
    /// Publishes the event, failing on the first projection error.
    async fn publish(&self, event: &StreamEvent) -> Result<(), DomainError>;
}
