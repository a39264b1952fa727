//! Durable subscription cursors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::EventKind;

/// Event type of the marker records written to checkpoint streams.
pub const CHECKPOINT_STORED_EVENT_TYPE: &str = "CheckpointStored";

/// How far a named subscription has consumed the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint<'a> {
    /// The subscription the cursor belongs to.
    pub subscription_id: &'a str,
    /// Global position of the last fully processed event; `0` for none.
    pub position: u64,
}

/// Payload of a checkpoint marker event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStored {
    /// The subscription the cursor belongs to.
    pub subscription_id: String,
    /// Global position of the last fully processed event.
    pub position: u64,
    /// When the cursor was written.
    pub checkpointed_at: DateTime<Utc>,
}

impl EventKind for CheckpointStored {
    fn event_type(&self) -> &'static str {
        CHECKPOINT_STORED_EVENT_TYPE
    }
}

/// Repository of subscription cursors. One cursor per subscription id,
/// overwritten on every store.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Returns the stored position, or `0` if nothing was stored yet.
    async fn load(&self, subscription_id: &str) -> Result<u64, DomainError>;

    /// Replaces the stored position.
    async fn store(&self, checkpoint: Checkpoint<'_>) -> Result<(), DomainError>;
}
