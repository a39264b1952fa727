//! Checkpoint repositories: one on top of any [`EventStore`], one backed by
//! a PostgreSQL table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use eventide_core::checkpoint::{Checkpoint, CheckpointRepository, CheckpointStored};
use eventide_core::error::DomainError;
use eventide_core::event::{DomainEvent, Metadata, StreamEvent};
use eventide_core::serializer::{EventSerializer, JsonEventSerializer};
use eventide_core::store::EventStore;
use eventide_core::stream::{ExpectedStreamVersion, StreamName, StreamReadPosition};

/// Keeps each cursor as a `CheckpointStored` event in the stream
/// `$checkpoint_stream_{subscription_id}`, capped to a single visible record.
pub struct EventStoreCheckpointRepository<S = JsonEventSerializer> {
    event_store: Arc<dyn EventStore>,
    serializer: S,
}

impl EventStoreCheckpointRepository {
    /// Creates a repository using the JSON codec.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self::with_serializer(event_store, JsonEventSerializer)
    }
}

impl<S: EventSerializer> EventStoreCheckpointRepository<S> {
    /// Creates a repository using a custom codec.
    #[must_use]
    pub fn with_serializer(event_store: Arc<dyn EventStore>, serializer: S) -> Self {
        Self {
            event_store,
            serializer,
        }
    }
}

#[async_trait]
impl<S: EventSerializer> CheckpointRepository for EventStoreCheckpointRepository<S> {
    async fn load(&self, subscription_id: &str) -> Result<u64, DomainError> {
        let stream = StreamName::for_checkpoint(subscription_id);
        let records = match self
            .event_store
            .read_events_backwards(&stream, StreamReadPosition::End, 1)
            .await
        {
            Ok(records) => records,
            Err(DomainError::StreamNotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let Some(record) = records.first() else {
            return Ok(0);
        };
        let event: StreamEvent<CheckpointStored> = self.serializer.deserialize(record)?;
        Ok(event.event.kind.position)
    }

    async fn store(&self, checkpoint: Checkpoint<'_>) -> Result<(), DomainError> {
        let stream = StreamName::for_checkpoint(checkpoint.subscription_id);
        let now = Utc::now();
        let kind = CheckpointStored {
            subscription_id: checkpoint.subscription_id.to_owned(),
            position: checkpoint.position,
            checkpointed_at: now,
        };
        let event = StreamEvent::new(DomainEvent::new(kind, now), 0, Metadata::new());
        let data = self.serializer.serialize(&event)?;

        match self
            .event_store
            .append_events(&stream, ExpectedStreamVersion::StreamExists, vec![data.clone()])
            .await
        {
            Ok(_) => Ok(()),
            Err(DomainError::ConcurrencyConflict { actual: None, .. }) => {
                debug!(stream = %stream, "creating checkpoint stream");
                self.event_store.set_stream_max_count(&stream, 1).await?;
                self.event_store.append_new_events(&stream, vec![data]).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Keeps cursors in the `subscription_checkpoints` table.
#[derive(Debug, Clone)]
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    /// Creates a new `PgCheckpointRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn checkpoint_error(subscription_id: &str, e: &sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("checkpoint {subscription_id}: {e}"))
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn load(&self, subscription_id: &str) -> Result<u64, DomainError> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT position FROM subscription_checkpoints WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| checkpoint_error(subscription_id, &e))?;

        position.map_or(Ok(0), |p| {
            u64::try_from(p).map_err(|_| {
                DomainError::Infrastructure(format!(
                    "checkpoint {subscription_id}: negative position {p}"
                ))
            })
        })
    }

    async fn store(&self, checkpoint: Checkpoint<'_>) -> Result<(), DomainError> {
        let position = i64::try_from(checkpoint.position).map_err(|_| {
            DomainError::Validation(format!(
                "checkpoint position {} exceeds the BIGINT range",
                checkpoint.position
            ))
        })?;
        sqlx::query(
            "INSERT INTO subscription_checkpoints (subscription_id, position, updated_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (subscription_id) DO UPDATE \
             SET position = EXCLUDED.position, updated_at = EXCLUDED.updated_at",
        )
        .bind(checkpoint.subscription_id)
        .bind(position)
        .execute(&self.pool)
        .await
        .map_err(|e| checkpoint_error(checkpoint.subscription_id, &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eventide_core::checkpoint::CHECKPOINT_STORED_EVENT_TYPE;
    use eventide_test_support::FailingEventStore;

    use super::*;
    use crate::in_memory_event_store::InMemoryEventStore;

    #[tokio::test]
    async fn test_load_without_checkpoint_is_zero() {
        let repository = EventStoreCheckpointRepository::new(Arc::new(InMemoryEventStore::new()));

        let position = repository.load("projector").await.unwrap();

        assert_eq!(position, 0);
    }

    #[tokio::test]
    async fn test_store_then_load_returns_latest_position() {
        // Arrange
        let event_store = InMemoryEventStore::new();
        let repository = EventStoreCheckpointRepository::new(Arc::new(event_store.clone()));

        // Act
        for position in [3, 8, 21] {
            repository
                .store(Checkpoint {
                    subscription_id: "projector",
                    position,
                })
                .await
                .unwrap();
        }

        // Assert
        assert_eq!(repository.load("projector").await.unwrap(), 21);
        let visible = event_store
            .read_events_from_start(&StreamName::for_checkpoint("projector"))
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].event_type, CHECKPOINT_STORED_EVENT_TYPE);
    }

    #[tokio::test]
    async fn test_cursors_are_kept_per_subscription() {
        let repository = EventStoreCheckpointRepository::new(Arc::new(InMemoryEventStore::new()));

        repository
            .store(Checkpoint {
                subscription_id: "a",
                position: 4,
            })
            .await
            .unwrap();
        repository
            .store(Checkpoint {
                subscription_id: "b",
                position: 9,
            })
            .await
            .unwrap();

        assert_eq!(repository.load("a").await.unwrap(), 4);
        assert_eq!(repository.load("b").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_transport_failure_is_surfaced() {
        let repository = EventStoreCheckpointRepository::new(Arc::new(FailingEventStore));

        let loaded = repository.load("projector").await;
        let stored = repository
            .store(Checkpoint {
                subscription_id: "projector",
                position: 1,
            })
            .await;

        assert!(matches!(loaded, Err(DomainError::Read { .. })));
        assert!(matches!(stored, Err(DomainError::Append { .. })));
    }
}
