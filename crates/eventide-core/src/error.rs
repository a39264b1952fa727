//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::stream::{ExpectedStreamVersion, StreamName};

/// Top-level error type shared by aggregates, stores and the subscription
/// worker.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The stream does not exist or was deleted.
    #[error("stream not found: {0}")]
    StreamNotFound(StreamName),

    /// No events were found for the aggregate.
    #[error("aggregate not found: {aggregate_type} {aggregate_id}")]
    AggregateNotFound {
        /// The aggregate's type name.
        aggregate_type: String,
        /// The aggregate identifier.
        aggregate_id: Uuid,
    },

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on stream {stream}: expected version {expected}, found {}",
        actual.map_or_else(|| "no stream".to_owned(), |v| v.to_string())
    )]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream: StreamName,
        /// The expected version supplied by the writer.
        expected: ExpectedStreamVersion,
        /// The stream's actual last revision, `None` if it does not exist.
        actual: Option<u64>,
    },

    /// An event with this id is already pending on the aggregate.
    #[error("duplicate event: {0} is already uncommitted")]
    DuplicateEvent(Uuid),

    /// The aggregate has no handler for the event type.
    #[error("invalid event type {event_type} for aggregate {aggregate_type}")]
    InvalidEventType {
        /// The aggregate's type name.
        aggregate_type: String,
        /// The unhandled event type.
        event_type: String,
    },

    /// No factory is registered for the aggregate type.
    #[error("no factory registered for aggregate type {0}")]
    UnregisteredAggregate(String),

    /// Applying an event to an aggregate failed.
    #[error("failed to apply event {event_type} to aggregate {aggregate_id}: {source}")]
    Apply {
        /// The aggregate identifier.
        aggregate_id: Uuid,
        /// The event type being applied.
        event_type: String,
        /// The error raised by the aggregate.
        #[source]
        source: Box<DomainError>,
    },

    /// Encoding or decoding an event failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing log failed while reading.
    #[error("failed to read stream {stream}: {message}")]
    Read {
        /// The stream being read.
        stream: StreamName,
        /// Description of the failure.
        message: String,
    },

    /// The backing log failed while writing.
    #[error("failed to append to stream {stream}: {message}")]
    Append {
        /// The stream being written.
        stream: StreamName,
        /// Description of the failure.
        message: String,
    },

    /// A subscription or connection to the backing log was dropped.
    #[error("connection dropped: {0}")]
    TransientConnection(String),

    /// A projection failed to process an event.
    #[error("projection {projection} failed: {source}")]
    Projection {
        /// The projection name.
        projection: String,
        /// The error raised by the projection.
        #[source]
        source: Box<DomainError>,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Follows boxed `source` chains down to the innermost domain error.
    #[must_use]
    pub fn root_cause(&self) -> &DomainError {
        match self {
            Self::Apply { source, .. } | Self::Projection { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` for expected-version mismatches.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self.root_cause(), Self::ConcurrencyConflict { .. })
    }

    /// Returns `true` when a stream or aggregate does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::StreamNotFound(_) | Self::AggregateNotFound { .. }
        )
    }

    /// Returns `true` when the caller may reasonably retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::ConcurrencyConflict { .. } | Self::TransientConnection(_)
        )
    }
}

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing.
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    /// A setting could not be parsed or is out of range.
    #[error("invalid configuration value for {key}: {message}")]
    Invalid {
        /// The setting name.
        key: &'static str,
        /// Why it was rejected.
        message: String,
    },
}
