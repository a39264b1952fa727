//! Domain event abstractions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::stream::NO_STREAM_VERSION;

/// Trait implemented by each aggregate's event payload sum type.
pub trait EventKind:
    Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;
}

/// Immutable domain event envelope.
///
/// `K` is the event payload. Aggregates use their own [`EventKind`] type;
/// the subscription path works with `serde_json::Value` payloads and decodes
/// them on demand with [`DomainEvent::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent<K> {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Aggregate this event belongs to; nil until attached.
    pub aggregate_id: Uuid,
    /// Position within the aggregate's history; [`NO_STREAM_VERSION`] until attached.
    pub aggregate_sequence_number: i64,
    /// Event-specific payload.
    pub kind: K,
}

impl<K: EventKind> DomainEvent<K> {
    /// Creates a fresh, unattached event.
    #[must_use]
    pub fn new(kind: K, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: kind.event_type().to_owned(),
            occurred_at,
            aggregate_id: Uuid::nil(),
            aggregate_sequence_number: NO_STREAM_VERSION,
            kind,
        }
    }
}

impl<K> DomainEvent<K> {
    /// Returns a copy attached to an aggregate at the given sequence number.
    #[must_use]
    pub fn with_aggregate(self, aggregate_id: Uuid, aggregate_sequence_number: i64) -> Self {
        Self {
            aggregate_id,
            aggregate_sequence_number,
            ..self
        }
    }

    /// Returns `true` once the event has been attached to an aggregate.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.aggregate_sequence_number != NO_STREAM_VERSION
    }
}

impl DomainEvent<serde_json::Value> {
    /// Decodes the untyped payload into a concrete event kind.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not match `K`.
    pub fn decode<K: DeserializeOwned>(&self) -> Result<DomainEvent<K>, DomainError> {
        let kind = serde_json::from_value(self.kind.clone()).map_err(|e| {
            DomainError::Serialization(format!("cannot decode {}: {e}", self.event_type))
        })?;
        Ok(DomainEvent {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
            aggregate_id: self.aggregate_id,
            aggregate_sequence_number: self.aggregate_sequence_number,
            kind,
        })
    }
}

/// Key under which the correlation id is stored.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Key under which the causation id is stored.
pub const CAUSATION_ID_KEY: &str = "causation_id";

/// Free-form metadata stored next to each event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, serde_json::Value>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous one under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns `true` if no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style correlation id setter.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.insert(CORRELATION_ID_KEY, correlation_id.to_string());
        self
    }

    /// Builder-style causation id setter.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.insert(CAUSATION_ID_KEY, causation_id.to_string());
        self
    }

    /// Correlation id, if present and well formed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.uuid(CORRELATION_ID_KEY)
    }

    /// Causation id, if present and well formed.
    #[must_use]
    pub fn causation_id(&self) -> Option<Uuid> {
        self.uuid(CAUSATION_ID_KEY)
    }

    fn uuid(&self, key: &str) -> Option<Uuid> {
        self.get(key)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// The unit exchanged with an event store: a domain event plus its position
/// in its own stream (`version`) and in the whole log (`position`).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent<P = serde_json::Value> {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream-local revision.
    pub version: u64,
    /// Log-global position; `0` until the event has been stored.
    pub position: u64,
    /// The domain event.
    pub event: DomainEvent<P>,
    /// Metadata stored with the event.
    pub metadata: Metadata,
}

impl<P> StreamEvent<P> {
    /// Wraps a domain event that has not been stored yet.
    #[must_use]
    pub fn new(event: DomainEvent<P>, version: u64, metadata: Metadata) -> Self {
        Self {
            event_id: event.event_id,
            version,
            position: 0,
            event,
            metadata,
        }
    }
}
