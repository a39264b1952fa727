//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::stream::{
    AppendEventsResult, ExpectedStreamVersion, StreamName, StreamReadPosition,
    StreamTruncatePosition,
};

/// Page size used by the `*_from_start` / `*_from_end` convenience reads.
pub const DEFAULT_READ_COUNT: u64 = 4096;

/// Serialized event ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event.
    pub data: Vec<u8>,
    /// Serialized metadata.
    pub metadata: Vec<u8>,
}

/// Event as read back from the backing log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Stream the event belongs to.
    pub stream_name: StreamName,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Stream-local revision, starting at 0.
    pub version: u64,
    /// Log-global position, starting at 1.
    pub position: u64,
    /// Serialized event; empty for tombstones and metadata-only records.
    pub data: Vec<u8>,
    /// Serialized metadata.
    pub metadata: Vec<u8>,
    /// When the backing log accepted the event.
    pub created_at: DateTime<Utc>,
}

/// Stream-addressed access to the backing log with optimistic concurrency.
///
/// Implementations never retry on their own: conflicts are returned as
/// `DomainError::ConcurrencyConflict`, missing streams as
/// `DomainError::StreamNotFound`, and transport failures as
/// `DomainError::Read` / `DomainError::Append` naming the stream.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events if the stream's revision satisfies `expected_version`.
    async fn append_events(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
        events: Vec<EventData>,
    ) -> Result<AppendEventsResult, DomainError>;

    /// Reads up to `count` events forward from `from`.
    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError>;

    /// Reads up to `count` events backward from `from`, newest first.
    async fn read_events_backwards(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError>;

    /// Hides events below `truncate_before` from readers without deleting them.
    async fn truncate_stream(
        &self,
        stream: &StreamName,
        truncate_before: StreamTruncatePosition,
        expected_version: ExpectedStreamVersion,
    ) -> Result<AppendEventsResult, DomainError>;

    /// Deletes the stream if its revision satisfies `expected_version`.
    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
    ) -> Result<(), DomainError>;

    /// Keeps only the newest `max_count` events of the stream visible.
    async fn set_stream_max_count(
        &self,
        stream: &StreamName,
        max_count: u64,
    ) -> Result<(), DomainError>;

    /// Appends events to a stream that must not exist yet.
    async fn append_new_events(
        &self,
        stream: &StreamName,
        events: Vec<EventData>,
    ) -> Result<AppendEventsResult, DomainError> {
        self.append_events(stream, ExpectedStreamVersion::NoStream, events)
            .await
    }

    /// Reads from the first visible event.
    async fn read_events_from_start(
        &self,
        stream: &StreamName,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.read_events_from_start_with_max_count(stream, DEFAULT_READ_COUNT)
            .await
    }

    /// Reads at most `count` events from the first visible event.
    async fn read_events_from_start_with_max_count(
        &self,
        stream: &StreamName,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.read_events(stream, StreamReadPosition::Start, count)
            .await
    }

    /// Reads backward from the last event.
    async fn read_events_backwards_from_end(
        &self,
        stream: &StreamName,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.read_events_backwards_from_end_with_max_count(stream, DEFAULT_READ_COUNT)
            .await
    }

    /// Reads at most `count` events backward from the last event.
    async fn read_events_backwards_from_end_with_max_count(
        &self,
        stream: &StreamName,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.read_events_backwards(stream, StreamReadPosition::End, count)
            .await
    }

    /// Checks the stream with a single-event backward read.
    async fn stream_exists(&self, stream: &StreamName) -> Result<bool, DomainError> {
        match self
            .read_events_backwards(stream, StreamReadPosition::End, 1)
            .await
        {
            Ok(_) => Ok(true),
            Err(DomainError::StreamNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
