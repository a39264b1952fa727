//! Typed load/store of aggregates on top of an [`EventStore`].
//!
//! Each aggregate instance lives in its own stream named
//! `{lowercase(AGGREGATE_TYPE)}-{aggregate_id}`.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use eventide_core::aggregate::AggregateRoot;
use eventide_core::error::DomainError;
use eventide_core::event::{DomainEvent, Metadata, StreamEvent};
use eventide_core::registry::AggregateRegistry;
use eventide_core::serializer::{EventSerializer, JsonEventSerializer};
use eventide_core::store::EventStore;
use eventide_core::stream::{
    AppendEventsResult, ExpectedStreamVersion, StreamName, StreamReadPosition,
};

use crate::config::AggregateStoreConfig;

/// Repository for aggregates of type `A`.
pub struct AggregateStore<A, S = JsonEventSerializer> {
    event_store: Arc<dyn EventStore>,
    registry: Arc<AggregateRegistry>,
    serializer: S,
    config: AggregateStoreConfig,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot> AggregateStore<A> {
    /// Creates a store using the JSON codec and default configuration.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, registry: Arc<AggregateRegistry>) -> Self {
        Self::with_serializer(event_store, registry, JsonEventSerializer)
    }
}

impl<A, S> AggregateStore<A, S>
where
    A: AggregateRoot,
    S: EventSerializer,
{
    /// Creates a store using a custom codec.
    #[must_use]
    pub fn with_serializer(
        event_store: Arc<dyn EventStore>,
        registry: Arc<AggregateRegistry>,
        serializer: S,
    ) -> Self {
        Self {
            event_store,
            registry,
            serializer,
            config: AggregateStoreConfig::default(),
            _aggregate: PhantomData,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AggregateStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Stream holding the events of aggregate `id`.
    #[must_use]
    pub fn stream_name(id: Uuid) -> StreamName {
        StreamName::for_aggregate(A::AGGREGATE_TYPE, id)
    }

    /// Appends the aggregate's pending events, expecting the stream to be at
    /// the aggregate's original version.
    ///
    /// # Errors
    ///
    /// See [`AggregateStore::store_with_version`].
    pub async fn store(
        &self,
        aggregate: &mut A,
        metadata: &Metadata,
    ) -> Result<AppendEventsResult, DomainError> {
        let expected = ExpectedStreamVersion::from_aggregate_version(aggregate.original_version());
        self.store_with_version(aggregate, metadata, expected).await
    }

    /// Appends the aggregate's pending events with an explicit concurrency
    /// token and marks them committed on success. Returns
    /// [`AppendEventsResult::NO_OP`] when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream moved on,
    /// `DomainError::Serialization` if an event cannot be encoded, or the
    /// store's transport error. The pending events are kept on failure so the
    /// caller may retry.
    #[instrument(skip(self, aggregate, metadata), fields(
        aggregate_type = A::AGGREGATE_TYPE,
        aggregate_id = %aggregate.aggregate_id(),
        expected = %expected_version,
    ))]
    pub async fn store_with_version(
        &self,
        aggregate: &mut A,
        metadata: &Metadata,
        expected_version: ExpectedStreamVersion,
    ) -> Result<AppendEventsResult, DomainError> {
        if !aggregate.has_uncommitted_events() {
            debug!("nothing to store");
            return Ok(AppendEventsResult::NO_OP);
        }

        let stream = Self::stream_name(aggregate.aggregate_id());
        let events = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| {
                let version = u64::try_from(event.aggregate_sequence_number).map_err(|_| {
                    DomainError::Infrastructure(format!(
                        "event {} has no stream version",
                        event.event_id
                    ))
                })?;
                self.serializer
                    .serialize(&StreamEvent::new(event.clone(), version, metadata.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let count = events.len();

        let result = self
            .event_store
            .append_events(&stream, expected_version, events)
            .await?;
        aggregate.mark_uncommitted_events_as_committed();

        info!(
            stream = %stream,
            count,
            global_position = result.global_position,
            "stored aggregate events"
        );
        Ok(result)
    }

    /// Loads aggregate `id` from its full history.
    ///
    /// # Errors
    ///
    /// See [`AggregateStore::load_with_read_position`].
    pub async fn load(&self, id: Uuid) -> Result<A, DomainError> {
        self.load_with_read_position(id, StreamReadPosition::Start)
            .await
    }

    /// Loads aggregate `id`, replaying its stream from `from` in pages of
    /// `page_size` events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnregisteredAggregate` if `A` is not in the
    /// registry, `DomainError::AggregateNotFound` if the stream is missing or
    /// yields no events, `DomainError::Serialization` for undecodable events
    /// and `DomainError::Apply` if the aggregate rejects an event.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load_with_read_position(
        &self,
        id: Uuid,
        from: StreamReadPosition,
    ) -> Result<A, DomainError> {
        let mut aggregate: A = self.registry.create(id)?;
        let stream = Self::stream_name(id);
        let page_size = self.config.page_size.get();

        let mut cursor = from;
        let mut history: Vec<DomainEvent<A::Kind>> = Vec::new();
        let mut metadata = Metadata::new();
        loop {
            let page = match self.event_store.read_events(&stream, cursor, page_size).await {
                Ok(page) => page,
                Err(DomainError::StreamNotFound(_)) => return Err(not_found::<A>(id)),
                Err(e) => return Err(e),
            };
            let page_len = page.len() as u64;
            if let Some(last) = page.last() {
                cursor = StreamReadPosition::Offset(last.version + 1);
            }
            for record in &page {
                let event: StreamEvent<A::Kind> = self.serializer.deserialize(record)?;
                metadata = event.metadata;
                history.push(event.event);
            }
            if page_len < page_size {
                break;
            }
        }

        if history.is_empty() {
            return Err(not_found::<A>(id));
        }
        let count = history.len();
        aggregate.load_from_history(history, &metadata)?;

        debug!(stream = %stream, count, version = aggregate.current_version(), "loaded aggregate");
        Ok(aggregate)
    }

    /// Returns `true` if aggregate `id` has a stream.
    ///
    /// # Errors
    ///
    /// Propagates the store's transport error.
    pub async fn exists(&self, id: Uuid) -> Result<bool, DomainError> {
        self.event_store
            .stream_exists(&Self::stream_name(id))
            .await
    }
}

fn not_found<A: AggregateRoot>(id: Uuid) -> DomainError {
    DomainError::AggregateNotFound {
        aggregate_type: A::AGGREGATE_TYPE.to_owned(),
        aggregate_id: id,
    }
}
