//! Internal event bus contract.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::StreamEvent;

/// Publishes stored events to in-process consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: &StreamEvent) -> Result<(), DomainError>;
}
