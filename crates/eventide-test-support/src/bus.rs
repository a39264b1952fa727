//! Test bus: records published events.

use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::bus::EventBus;
use eventide_core::error::DomainError;
use eventide_core::event::StreamEvent;

use crate::journal::CallJournal;

/// An event bus that records every published event.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<StreamEvent>>,
    journal: Option<CallJournal>,
}

impl RecordingEventBus {
    /// Creates an empty recording bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records each publish into `journal` as `"bus:{event_id}"`.
    #[must_use]
    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Returns a snapshot of all published events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<StreamEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: &StreamEvent) -> Result<(), DomainError> {
        if let Some(journal) = &self.journal {
            journal.record(format!("bus:{}", event.event_id));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}
