//! Shared call journal for asserting cross-component ordering.

use std::sync::{Arc, Mutex};

/// Ordered log of `"{component}:{event_id}"` entries shared by test doubles.
#[derive(Debug, Clone, Default)]
pub struct CallJournal(Arc<Mutex<Vec<String>>>);

impl CallJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    /// Returns a snapshot of all entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
