//! Test projections: mock `Projection` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::event::StreamEvent;
use eventide_core::projection::Projection;
use uuid::Uuid;

use crate::journal::CallJournal;

/// A projection that records every event it receives. Optionally fails on
/// its n-th call (1-based) and writes to a shared [`CallJournal`].
#[derive(Debug)]
pub struct RecordingProjection {
    name: String,
    seen: Mutex<Vec<StreamEvent>>,
    calls: Mutex<usize>,
    fail_on_call: Option<usize>,
    journal: Option<CallJournal>,
}

impl RecordingProjection {
    /// Creates a projection that always succeeds.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            seen: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            fail_on_call: None,
            journal: None,
        }
    }

    /// Makes the `call`-th invocation fail with an infrastructure error.
    #[must_use]
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Records each successful invocation into `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Returns a snapshot of the events processed successfully.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.seen.lock().unwrap().clone()
    }

    /// Returns the ids of the events processed successfully.
    pub fn event_ids(&self) -> Vec<Uuid> {
        self.events().iter().map(|e| e.event_id).collect()
    }

    /// Returns how many times `process_event` was called, failures included.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Projection for RecordingProjection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_event(&self, event: &StreamEvent) -> Result<(), DomainError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_on_call == Some(call) {
            return Err(DomainError::Infrastructure("read model unavailable".into()));
        }
        if let Some(journal) = &self.journal {
            journal.record(format!("{}:{}", self.name, event.event_id));
        }
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}
