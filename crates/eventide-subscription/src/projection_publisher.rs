//! Sequential fan-out of stored events to projections.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, trace};

use eventide_core::error::DomainError;
use eventide_core::event::StreamEvent;
use eventide_core::projection::{Projection, ProjectionPublisher};

/// Runs every registered projection, one after another, in registration
/// order. The first failure stops the fan-out; projections that already ran
/// are not compensated.
#[derive(Default)]
pub struct SequentialProjectionPublisher {
    projections: Vec<Arc<dyn Projection>>,
}

impl SequentialProjectionPublisher {
    /// Creates a publisher with no projections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a projection to the fan-out order.
    #[must_use]
    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Appends a projection to the fan-out order.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Number of registered projections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    /// Returns `true` if no projection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }
}

#[async_trait]
impl ProjectionPublisher for SequentialProjectionPublisher {
    async fn publish(&self, event: &StreamEvent) -> Result<(), DomainError> {
        for projection in &self.projections {
            trace!(projection = projection.name(), event_id = %event.event_id, "projecting event");
            if let Err(source) = projection.process_event(event).await {
                error!(
                    projection = projection.name(),
                    event_id = %event.event_id,
                    position = event.position,
                    error = %source,
                    "projection failed"
                );
                return Err(DomainError::Projection {
                    projection: projection.name().to_owned(),
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }
}
