//! Stream addressing and optimistic-concurrency value types.
//!
//! These are pure values shared by every event store backend. They carry no
//! I/O and no knowledge of the backing log's wire format.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version an aggregate reports before any event has been stored.
pub const NO_STREAM_VERSION: i64 = -1;

/// Prefix of every checkpoint stream name.
pub const CHECKPOINT_STREAM_PREFIX: &str = "$checkpoint_stream_";

/// Name of a single event stream in the backing log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Creates a stream name from an arbitrary string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Stream holding the events of one aggregate instance:
    /// `"{lowercase(aggregate_type)}-{aggregate_id}"`.
    #[must_use]
    pub fn for_aggregate(aggregate_type: &str, aggregate_id: Uuid) -> Self {
        Self(format!("{}-{aggregate_id}", aggregate_type.to_lowercase()))
    }

    /// Stream holding the checkpoint of a named subscription.
    #[must_use]
    pub fn for_checkpoint(subscription_id: &str) -> Self {
        Self(format!("{CHECKPOINT_STREAM_PREFIX}{subscription_id}"))
    }

    /// Returns the raw stream name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part of the name before the first `-`, if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.0.split_once('-').map(|(category, _)| category)
    }

    /// Returns `true` for streams owned by the backing log itself (`$`-prefixed).
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Concurrency token supplied with every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedStreamVersion {
    /// The stream must not exist yet.
    NoStream,
    /// No concurrency check.
    Any,
    /// The stream must exist, at any revision.
    StreamExists,
    /// The stream's last revision must equal this value.
    Exact(u64),
}

impl ExpectedStreamVersion {
    /// Maps an aggregate version to a concurrency token. Negative versions
    /// (the [`NO_STREAM_VERSION`] sentinel) mean the stream must not exist.
    #[must_use]
    pub fn from_aggregate_version(version: i64) -> Self {
        u64::try_from(version).map_or(Self::NoStream, Self::Exact)
    }

    /// Checks the token against the stream's current last revision, where
    /// `None` means the stream does not exist (or was deleted).
    #[must_use]
    pub fn is_satisfied_by(self, current: Option<u64>) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => current.is_none(),
            Self::StreamExists => current.is_some(),
            Self::Exact(expected) => current == Some(expected),
        }
    }
}

impl fmt::Display for ExpectedStreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStream => f.write_str("no-stream"),
            Self::Any => f.write_str("any"),
            Self::StreamExists => f.write_str("stream-exists"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// Where a stream read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamReadPosition {
    /// The first visible event of the stream.
    Start,
    /// The last event of the stream.
    End,
    /// An explicit stream revision.
    Offset(u64),
}

/// Events with a revision below this position are hidden from readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamTruncatePosition(pub u64);

/// Outcome of a successful append or truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEventsResult {
    /// Log-global position of the last written record.
    pub global_position: u64,
    /// Revision to pass as `Exact` on the next append to the same stream.
    pub next_expected_version: u64,
}

impl AppendEventsResult {
    /// Nothing was written.
    pub const NO_OP: Self = Self {
        global_position: 0,
        next_expected_version: 0,
    };

    /// Creates a new result.
    #[must_use]
    pub fn new(global_position: u64, next_expected_version: u64) -> Self {
        Self {
            global_position,
            next_expected_version,
        }
    }

    /// Returns `true` for the [`AppendEventsResult::NO_OP`] sentinel.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        *self == Self::NO_OP
    }
}

/// Per-stream settings that restrict which events readers see. Events are
/// never physically removed by these settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Revisions strictly below this value are hidden.
    pub truncate_before: Option<u64>,
    /// Only the newest `max_count` events stay visible.
    pub max_count: Option<u64>,
    /// Revisions strictly below this value belong to a deleted incarnation
    /// of the stream. Set by a delete; truncation never lowers it.
    pub deleted_before: Option<u64>,
}

impl StreamMetadata {
    /// First revision a reader may see, given the stream's last revision.
    #[must_use]
    pub fn first_visible_version(&self, last_version: u64) -> u64 {
        let truncated = self.truncate_before.unwrap_or(0);
        let capped = self
            .max_count
            .map_or(0, |max| (last_version + 1).saturating_sub(max));
        truncated
            .max(capped)
            .max(self.deleted_before.unwrap_or(0))
    }
}
