//! In-process implementation of the `EventStore` and `LogSubscriber` traits.
//!
//! All streams share one append-only log guarded by a mutex. A `watch`
//! channel carries the log head so subscriptions can tail new records.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio::sync::watch;
use tracing::debug;

use eventide_core::error::DomainError;
use eventide_core::store::{EventData, EventStore, RecordedEvent};
use eventide_core::stream::{
    AppendEventsResult, ExpectedStreamVersion, StreamMetadata, StreamName, StreamReadPosition,
    StreamTruncatePosition,
};
use eventide_core::subscription::{EventSubscription, LogSubscriber, SubscriptionFilter};

#[derive(Debug, Default)]
struct StreamState {
    /// Indices into `Log::records`; entry `v` holds stream revision `v`.
    records: Vec<usize>,
    metadata: StreamMetadata,
    deleted: bool,
}

impl StreamState {
    fn last_version(&self) -> Option<u64> {
        (self.records.len() as u64).checked_sub(1)
    }

    /// Last revision as seen by concurrency checks and readers.
    fn current(&self) -> Option<u64> {
        if self.deleted {
            None
        } else {
            self.last_version()
        }
    }
}

#[derive(Debug, Default)]
struct Log {
    records: Vec<RecordedEvent>,
    streams: HashMap<StreamName, StreamState>,
}

impl Log {
    fn current(&self, stream: &StreamName) -> Option<u64> {
        self.streams.get(stream).and_then(StreamState::current)
    }

    fn check(
        &self,
        stream: &StreamName,
        expected: ExpectedStreamVersion,
    ) -> Result<Option<u64>, DomainError> {
        let current = self.current(stream);
        if expected.is_satisfied_by(current) {
            Ok(current)
        } else {
            Err(DomainError::ConcurrencyConflict {
                stream: stream.clone(),
                expected,
                actual: current,
            })
        }
    }

    /// Returns the stream's state, its last revision and first visible revision.
    fn visible(&self, stream: &StreamName) -> Result<(&StreamState, u64, u64), DomainError> {
        let state = self
            .streams
            .get(stream)
            .ok_or_else(|| DomainError::StreamNotFound(stream.clone()))?;
        let last = state
            .current()
            .ok_or_else(|| DomainError::StreamNotFound(stream.clone()))?;
        Ok((state, last, state.metadata.first_visible_version(last)))
    }

    fn global_position_of(&self, state: &StreamState, version: u64) -> u64 {
        usize::try_from(version)
            .ok()
            .and_then(|v| state.records.get(v))
            .map_or(0, |&index| self.records[index].position)
    }
}

/// In-memory event store. Cloning yields another handle to the same log.
#[derive(Debug, Clone)]
pub struct InMemoryEventStore {
    log: Arc<Mutex<Log>>,
    head: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            head: Arc::new(head),
        }
    }

    /// Global position of the newest record, `0` for an empty log.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the log lock is poisoned.
    pub fn head_position(&self) -> Result<u64, DomainError> {
        Ok(self.lock()?.records.len() as u64)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Log>, DomainError> {
        self.log
            .lock()
            .map_err(|_| DomainError::Infrastructure("in-memory event log lock poisoned".into()))
    }
}

fn limit(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}

fn index(version: u64) -> usize {
    usize::try_from(version).unwrap_or(usize::MAX)
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
        events: Vec<EventData>,
    ) -> Result<AppendEventsResult, DomainError> {
        let mut guard = self.lock()?;
        guard.check(stream, expected_version)?;
        if events.is_empty() {
            return Ok(AppendEventsResult::NO_OP);
        }

        let log = &mut *guard;
        let state = log.streams.entry(stream.clone()).or_default();
        let created_at = Utc::now();
        let mut version = state.records.len() as u64;
        for event in events {
            let position = log.records.len() as u64 + 1;
            state.records.push(log.records.len());
            log.records.push(RecordedEvent {
                stream_name: stream.clone(),
                event_id: event.event_id,
                event_type: event.event_type,
                version,
                position,
                data: event.data,
                metadata: event.metadata,
                created_at,
            });
            version += 1;
        }
        state.deleted = false;

        let head = log.records.len() as u64;
        drop(guard);
        self.head.send_replace(head);
        debug!(stream = %stream, head, "appended events");

        Ok(AppendEventsResult::new(head, version - 1))
    }

    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let log = self.lock()?;
        let (state, last, first) = log.visible(stream)?;
        let start = match from {
            StreamReadPosition::Start => first,
            StreamReadPosition::End => last + 1,
            StreamReadPosition::Offset(version) => version.max(first),
        };

        Ok(state
            .records
            .iter()
            .skip(index(start))
            .take(limit(count))
            .map(|&i| log.records[i].clone())
            .collect())
    }

    async fn read_events_backwards(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let log = self.lock()?;
        let (state, last, first) = log.visible(stream)?;
        let start = match from {
            StreamReadPosition::Start => first,
            StreamReadPosition::End => last,
            StreamReadPosition::Offset(version) => version.min(last),
        };
        if start < first {
            return Ok(Vec::new());
        }

        Ok((first..=start)
            .rev()
            .take(limit(count))
            .map(|version| log.records[state.records[index(version)]].clone())
            .collect())
    }

    async fn truncate_stream(
        &self,
        stream: &StreamName,
        truncate_before: StreamTruncatePosition,
        expected_version: ExpectedStreamVersion,
    ) -> Result<AppendEventsResult, DomainError> {
        let mut log = self.lock()?;
        let current = log.check(stream, expected_version)?;
        let state = log.streams.entry(stream.clone()).or_default();
        state.metadata.truncate_before = Some(truncate_before.0);
        debug!(stream = %stream, truncate_before = truncate_before.0, "truncated stream");

        let Some(last) = current else {
            return Ok(AppendEventsResult::NO_OP);
        };
        let state = &log.streams[stream];
        Ok(AppendEventsResult::new(
            log.global_position_of(state, last),
            last,
        ))
    }

    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
    ) -> Result<(), DomainError> {
        let mut log = self.lock()?;
        let Some(last) = log.check(stream, expected_version)? else {
            return Err(DomainError::StreamNotFound(stream.clone()));
        };
        if let Some(state) = log.streams.get_mut(stream) {
            state.deleted = true;
            state.metadata.deleted_before = Some(last + 1);
        }
        debug!(stream = %stream, "deleted stream");
        Ok(())
    }

    async fn set_stream_max_count(
        &self,
        stream: &StreamName,
        max_count: u64,
    ) -> Result<(), DomainError> {
        let mut log = self.lock()?;
        log.streams.entry(stream.clone()).or_default().metadata.max_count = Some(max_count);
        Ok(())
    }
}

struct Tail {
    log: Arc<Mutex<Log>>,
    head: watch::Receiver<u64>,
    after: u64,
    filter: SubscriptionFilter,
    pending: VecDeque<RecordedEvent>,
    failed: bool,
}

impl Tail {
    /// Moves every record after `self.after` into `pending`, filtered.
    fn scan(&mut self) -> Result<(), DomainError> {
        let log = self
            .log
            .lock()
            .map_err(|_| DomainError::TransientConnection("in-memory event log lock poisoned".into()))?;
        let filter = &self.filter;
        self.pending.extend(
            log.records
                .iter()
                .skip(index(self.after))
                .filter(|record| filter.matches(record))
                .cloned(),
        );
        self.after = log.records.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl LogSubscriber for InMemoryEventStore {
    async fn subscribe_to_all(
        &self,
        after: Option<u64>,
        filter: &SubscriptionFilter,
    ) -> Result<EventSubscription, DomainError> {
        let tail = Tail {
            log: Arc::clone(&self.log),
            head: self.head.subscribe(),
            after: after.unwrap_or(0),
            filter: filter.clone(),
            pending: VecDeque::new(),
            failed: false,
        };

        Ok(stream::unfold(tail, |mut tail| async move {
            if tail.failed {
                return None;
            }
            loop {
                if let Some(record) = tail.pending.pop_front() {
                    return Some((Ok(record), tail));
                }
                tail.head.borrow_and_update();
                if let Err(e) = tail.scan() {
                    tail.failed = true;
                    return Some((Err(e), tail));
                }
                if tail.pending.is_empty() && tail.head.changed().await.is_err() {
                    return None;
                }
            }
        })
        .boxed())
    }
}
