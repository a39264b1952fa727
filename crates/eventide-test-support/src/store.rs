//! Test event stores: backing logs that always fail.

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::store::{EventData, EventStore, RecordedEvent};
use eventide_core::stream::{
    AppendEventsResult, ExpectedStreamVersion, StreamName, StreamReadPosition,
    StreamTruncatePosition,
};
use eventide_core::subscription::{EventSubscription, LogSubscriber, SubscriptionFilter};

/// An event store whose every operation fails with a transport error.
/// Useful for testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

fn read_failure(stream: &StreamName) -> DomainError {
    DomainError::Read {
        stream: stream.clone(),
        message: "connection refused".into(),
    }
}

fn append_failure(stream: &StreamName) -> DomainError {
    DomainError::Append {
        stream: stream.clone(),
        message: "connection refused".into(),
    }
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append_events(
        &self,
        stream: &StreamName,
        _expected_version: ExpectedStreamVersion,
        _events: Vec<EventData>,
    ) -> Result<AppendEventsResult, DomainError> {
        Err(append_failure(stream))
    }

    async fn read_events(
        &self,
        stream: &StreamName,
        _from: StreamReadPosition,
        _count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        Err(read_failure(stream))
    }

    async fn read_events_backwards(
        &self,
        stream: &StreamName,
        _from: StreamReadPosition,
        _count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        Err(read_failure(stream))
    }

    async fn truncate_stream(
        &self,
        stream: &StreamName,
        _truncate_before: StreamTruncatePosition,
        _expected_version: ExpectedStreamVersion,
    ) -> Result<AppendEventsResult, DomainError> {
        Err(append_failure(stream))
    }

    async fn delete_stream(
        &self,
        stream: &StreamName,
        _expected_version: ExpectedStreamVersion,
    ) -> Result<(), DomainError> {
        Err(append_failure(stream))
    }

    async fn set_stream_max_count(
        &self,
        stream: &StreamName,
        _max_count: u64,
    ) -> Result<(), DomainError> {
        Err(append_failure(stream))
    }
}

#[async_trait]
impl LogSubscriber for FailingEventStore {
    async fn subscribe_to_all(
        &self,
        _after: Option<u64>,
        _filter: &SubscriptionFilter,
    ) -> Result<EventSubscription, DomainError> {
        Err(DomainError::TransientConnection("connection refused".into()))
    }
}
