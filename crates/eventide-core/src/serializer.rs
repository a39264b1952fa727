//! Conversion between typed stream events and the backing log's records.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DomainError;
use crate::event::{DomainEvent, Metadata, StreamEvent};
use crate::store::{EventData, RecordedEvent};

/// Codec for event envelopes and their metadata.
pub trait EventSerializer: Send + Sync {
    /// Encodes an event for appending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if encoding fails.
    fn serialize<P: Serialize>(&self, event: &StreamEvent<P>) -> Result<EventData, DomainError>;

    /// Decodes a recorded event, taking version and position from the record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the data or metadata cannot be
    /// decoded into the requested payload type.
    fn deserialize<P: DeserializeOwned>(
        &self,
        recorded: &RecordedEvent,
    ) -> Result<StreamEvent<P>, DomainError>;
}

/// JSON codec: `data` holds the whole [`DomainEvent`] envelope, `metadata`
/// the [`Metadata`] map. Empty metadata bytes decode to empty metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize<P: Serialize>(&self, event: &StreamEvent<P>) -> Result<EventData, DomainError> {
        let data = serde_json::to_vec(&event.event).map_err(|e| {
            DomainError::Serialization(format!(
                "cannot encode event {}: {e}",
                event.event.event_type
            ))
        })?;
        let metadata = serde_json::to_vec(&event.metadata)
            .map_err(|e| DomainError::Serialization(format!("cannot encode metadata: {e}")))?;

        Ok(EventData {
            event_id: event.event_id,
            event_type: event.event.event_type.clone(),
            data,
            metadata,
        })
    }

    fn deserialize<P: DeserializeOwned>(
        &self,
        recorded: &RecordedEvent,
    ) -> Result<StreamEvent<P>, DomainError> {
        let event: DomainEvent<P> = serde_json::from_slice(&recorded.data).map_err(|e| {
            DomainError::Serialization(format!(
                "cannot decode event {} at {}@{}: {e}",
                recorded.event_type, recorded.stream_name, recorded.version
            ))
        })?;
        let metadata = if recorded.metadata.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_slice(&recorded.metadata).map_err(|e| {
                DomainError::Serialization(format!(
                    "cannot decode metadata of {}@{}: {e}",
                    recorded.stream_name, recorded.version
                ))
            })?
        };

        Ok(StreamEvent {
            event_id: recorded.event_id,
            version: recorded.version,
            position: recorded.position,
            event,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;
    use uuid::Uuid;

    use super::*;
    use crate::event::EventKind;
    use crate::stream::StreamName;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    impl EventKind for Renamed {
        fn event_type(&self) -> &'static str {
            "profile.renamed"
        }
    }

    fn record(data: EventData, version: u64, position: u64) -> RecordedEvent {
        RecordedEvent {
            stream_name: StreamName::new("profile-1"),
            event_id: data.event_id,
            event_type: data.event_type,
            version,
            position,
            data: data.data,
            metadata: data.metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_recorded_event_keeps_store_coordinates() {
        // Arrange
        let correlation_id = Uuid::new_v4();
        let event = DomainEvent::new(
            Renamed {
                name: "Ada".into(),
            },
            Utc::now(),
        )
        .with_aggregate(Uuid::new_v4(), 2);
        let outgoing = StreamEvent::new(
            event.clone(),
            2,
            Metadata::new().with_correlation_id(correlation_id),
        );

        // Act
        let data = JsonEventSerializer.serialize(&outgoing).unwrap();
        let incoming: StreamEvent<Renamed> =
            JsonEventSerializer.deserialize(&record(data, 2, 41)).unwrap();

        // Assert
        assert_eq!(incoming.event, event);
        assert_eq!(incoming.event_id, event.event_id);
        assert_eq!(incoming.version, 2);
        assert_eq!(incoming.position, 41);
        assert_eq!(incoming.metadata.correlation_id(), Some(correlation_id));
    }

    #[test]
    fn test_untyped_view_exposes_payload_as_json() {
        let event = DomainEvent::new(
            Renamed {
                name: "Grace".into(),
            },
            Utc::now(),
        );
        let data = JsonEventSerializer
            .serialize(&StreamEvent::new(event, 0, Metadata::new()))
            .unwrap();

        let untyped: StreamEvent = JsonEventSerializer.deserialize(&record(data, 0, 1)).unwrap();

        assert_eq!(untyped.event.event_type, "profile.renamed");
        assert_eq!(untyped.event.kind, serde_json::json!({"name": "Grace"}));
    }

    #[test]
    fn test_empty_metadata_bytes_decode_to_empty_metadata() {
        let event = DomainEvent::new(Renamed { name: "x".into() }, Utc::now());
        let mut data = JsonEventSerializer
            .serialize(&StreamEvent::new(event, 0, Metadata::new()))
            .unwrap();
        data.metadata.clear();

        let decoded: StreamEvent<Renamed> =
            JsonEventSerializer.deserialize(&record(data, 0, 1)).unwrap();

        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn test_garbage_data_is_a_serialization_error() {
        let data = EventData {
            event_id: Uuid::new_v4(),
            event_type: "profile.renamed".into(),
            data: b"not json".to_vec(),
            metadata: Vec::new(),
        };

        let result = JsonEventSerializer.deserialize::<Renamed>(&record(data, 0, 1));

        assert!(matches!(result, Err(DomainError::Serialization(_))));
    }
}
