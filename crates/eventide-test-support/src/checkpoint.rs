//! Test checkpoint repository: keeps cursors in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::checkpoint::{Checkpoint, CheckpointRepository};
use eventide_core::error::DomainError;

/// A checkpoint repository backed by a `HashMap`. Can be told to start
/// failing at a given `store` call to simulate a crash before the cursor is
/// persisted.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    positions: Mutex<HashMap<String, u64>>,
    history: Mutex<Vec<u64>>,
    fail_on_store: Option<usize>,
}

impl InMemoryCheckpointRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stored position.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn with_position(self, subscription_id: &str, position: u64) -> Self {
        self.positions
            .lock()
            .unwrap()
            .insert(subscription_id.to_owned(), position);
        self
    }

    /// Makes every `store` after the first `call - 1` successful ones fail
    /// without persisting anything.
    #[must_use]
    pub fn failing_on_store(mut self, call: usize) -> Self {
        self.fail_on_store = Some(call);
        self
    }

    /// Returns the stored position for a subscription.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn position(&self, subscription_id: &str) -> Option<u64> {
        self.positions.lock().unwrap().get(subscription_id).copied()
    }

    /// Returns every position passed to a successful `store`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn history(&self) -> Vec<u64> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn load(&self, subscription_id: &str) -> Result<u64, DomainError> {
        Ok(self.position(subscription_id).unwrap_or(0))
    }

    async fn store(&self, checkpoint: Checkpoint<'_>) -> Result<(), DomainError> {
        let mut history = self.history.lock().unwrap();
        if self.fail_on_store == Some(history.len() + 1) {
            return Err(DomainError::Infrastructure("checkpoint storage crashed".into()));
        }
        history.push(checkpoint.position);
        self.positions
            .lock()
            .unwrap()
            .insert(checkpoint.subscription_id.to_owned(), checkpoint.position);
        Ok(())
    }
}
