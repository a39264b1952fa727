//! Aggregate root abstraction.
//!
//! An aggregate owns an [`EventSourcingState`] value and implements
//! [`AggregateRoot::when`] for its own event kind. Version tracking,
//! duplicate detection and history replay are provided by the trait.

use tracing::trace;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventKind, Metadata};
use crate::stream::NO_STREAM_VERSION;

/// Version bookkeeping and pending events of one aggregate instance.
#[derive(Debug, Clone)]
pub struct EventSourcingState<K> {
    id: Uuid,
    original_version: i64,
    current_version: i64,
    uncommitted_events: Vec<DomainEvent<K>>,
}

impl<K: EventKind> EventSourcingState<K> {
    /// Creates the state of an aggregate with no history.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            original_version: NO_STREAM_VERSION,
            current_version: NO_STREAM_VERSION,
            uncommitted_events: Vec::new(),
        }
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Version of the last event loaded from or committed to the store.
    #[must_use]
    pub fn original_version(&self) -> i64 {
        self.original_version
    }

    /// Version including uncommitted events.
    #[must_use]
    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    /// Events applied since the last commit, in emission order.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[DomainEvent<K>] {
        &self.uncommitted_events
    }

    /// Returns `true` while events are waiting to be stored.
    #[must_use]
    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    /// Stamps `event` with this aggregate's id and the next sequence number
    /// and queues it. Returns the stamped event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateEvent` if an event with the same id is
    /// already pending; the state is left unchanged.
    pub(crate) fn add_domain_event(
        &mut self,
        event: DomainEvent<K>,
    ) -> Result<DomainEvent<K>, DomainError> {
        if self
            .uncommitted_events
            .iter()
            .any(|pending| pending.event_id == event.event_id)
        {
            return Err(DomainError::DuplicateEvent(event.event_id));
        }
        let stamped = event.with_aggregate(self.id, self.current_version + 1);
        self.uncommitted_events.push(stamped.clone());
        Ok(stamped)
    }

    /// Clears pending events after they were appended to the store.
    pub fn mark_uncommitted_events_as_committed(&mut self) {
        self.uncommitted_events.clear();
        self.original_version = self.current_version;
    }

    fn discard_last_uncommitted(&mut self) {
        self.uncommitted_events.pop();
    }

    fn advance(&mut self) {
        self.current_version += 1;
    }

    fn advance_committed(&mut self) {
        self.original_version += 1;
        self.current_version += 1;
    }
}

/// Trait for aggregate roots that reconstitute from event history.
pub trait AggregateRoot: Send + Sync + 'static {
    /// The event payload type this aggregate produces and consumes.
    type Kind: EventKind;

    /// Type name used for stream naming and factory lookup.
    const AGGREGATE_TYPE: &'static str;

    /// Read access to the event-sourcing bookkeeping.
    fn sourcing(&self) -> &EventSourcingState<Self::Kind>;

    /// Write access to the event-sourcing bookkeeping.
    fn sourcing_mut(&mut self) -> &mut EventSourcingState<Self::Kind>;

    /// Mutates state for one event. Kinds the aggregate cannot handle must
    /// return [`unhandled_event`].
    ///
    /// # Errors
    ///
    /// Any error aborts the apply or replay that triggered it.
    fn when(&mut self, event: &DomainEvent<Self::Kind>) -> Result<(), DomainError>;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid {
        self.sourcing().id()
    }

    /// Version of the last stored event.
    fn original_version(&self) -> i64 {
        self.sourcing().original_version()
    }

    /// Version including uncommitted events.
    fn current_version(&self) -> i64 {
        self.sourcing().current_version()
    }

    /// Applies an event. New events are stamped and queued for storage
    /// before `when` runs; replayed ones are only folded into state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateEvent` for an already pending event id,
    /// or `DomainError::Apply` wrapping the error from `when`. On failure the
    /// version is not advanced and a new event is not left pending.
    fn apply(&mut self, event: DomainEvent<Self::Kind>, is_new: bool) -> Result<(), DomainError> {
        let aggregate_id = self.aggregate_id();
        if is_new {
            let stamped = self.sourcing_mut().add_domain_event(event)?;
            if let Err(source) = self.when(&stamped) {
                self.sourcing_mut().discard_last_uncommitted();
                return Err(apply_error(aggregate_id, &stamped.event_type, source));
            }
        } else {
            self.when(&event)
                .map_err(|source| apply_error(aggregate_id, &event.event_type, source))?;
        }
        self.sourcing_mut().advance();
        Ok(())
    }

    /// Replays stored events in the order given.
    ///
    /// # Errors
    ///
    /// Stops at the first failing event and returns `DomainError::Apply`.
    /// Events folded before the failure are not rolled back, so the
    /// instance must be discarded.
    fn load_from_history(
        &mut self,
        events: impl IntoIterator<Item = DomainEvent<Self::Kind>>,
        metadata: &Metadata,
    ) -> Result<(), DomainError> {
        for event in events {
            fold(self, &event, metadata)?;
        }
        Ok(())
    }

    /// Returns `true` while events are waiting to be stored.
    fn has_uncommitted_events(&self) -> bool {
        self.sourcing().has_uncommitted_events()
    }

    /// Events applied since the last commit.
    fn uncommitted_events(&self) -> &[DomainEvent<Self::Kind>] {
        self.sourcing().uncommitted_events()
    }

    /// Clears pending events after a successful append.
    fn mark_uncommitted_events_as_committed(&mut self) {
        self.sourcing_mut().mark_uncommitted_events_as_committed();
    }
}

/// The error an aggregate's `when` returns for an event kind it has no
/// handler for.
#[must_use]
pub fn unhandled_event<A: AggregateRoot>(event: &DomainEvent<A::Kind>) -> DomainError {
    DomainError::InvalidEventType {
        aggregate_type: A::AGGREGATE_TYPE.to_owned(),
        event_type: event.event_type.clone(),
    }
}

fn fold<A: AggregateRoot + ?Sized>(
    aggregate: &mut A,
    event: &DomainEvent<A::Kind>,
    metadata: &Metadata,
) -> Result<(), DomainError> {
    trace!(
        aggregate_id = %aggregate.aggregate_id(),
        event_type = %event.event_type,
        correlation_id = ?metadata.correlation_id(),
        "folding historical event"
    );
    aggregate
        .when(event)
        .map_err(|source| apply_error(aggregate.aggregate_id(), &event.event_type, source))?;
    aggregate.sourcing_mut().advance_committed();
    Ok(())
}

fn apply_error(aggregate_id: Uuid, event_type: &str, source: DomainError) -> DomainError {
    DomainError::Apply {
        aggregate_id,
        event_type: event_type.to_owned(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented { by: i64 },
        Reset,
        Retired,
    }

    impl EventKind for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Incremented { .. } => "counter.incremented",
                Self::Reset => "counter.reset",
                Self::Retired => "counter.retired",
            }
        }
    }

    #[derive(Debug)]
    struct Counter {
        sourcing: EventSourcingState<CounterEvent>,
        total: i64,
    }

    impl Counter {
        fn new(id: Uuid) -> Self {
            Self {
                sourcing: EventSourcingState::new(id),
                total: 0,
            }
        }
    }

    impl AggregateRoot for Counter {
        type Kind = CounterEvent;
        const AGGREGATE_TYPE: &'static str = "Counter";

        fn sourcing(&self) -> &EventSourcingState<CounterEvent> {
            &self.sourcing
        }

        fn sourcing_mut(&mut self) -> &mut EventSourcingState<CounterEvent> {
            &mut self.sourcing
        }

        fn when(&mut self, event: &DomainEvent<CounterEvent>) -> Result<(), DomainError> {
            match event.kind {
                CounterEvent::Incremented { by } => {
                    self.total += by;
                    Ok(())
                }
                CounterEvent::Reset => {
                    self.total = 0;
                    Ok(())
                }
                CounterEvent::Retired => Err(unhandled_event::<Self>(event)),
            }
        }
    }

    fn incremented(by: i64) -> DomainEvent<CounterEvent> {
        DomainEvent::new(CounterEvent::Incremented { by }, Utc::now())
    }

    fn history(id: Uuid, steps: &[i64]) -> Vec<DomainEvent<CounterEvent>> {
        steps
            .iter()
            .zip(0_i64..)
            .map(|(by, seq)| incremented(*by).with_aggregate(id, seq))
            .collect()
    }

    #[test]
    fn test_new_aggregate_starts_at_no_stream() {
        let counter = Counter::new(Uuid::new_v4());

        assert_eq!(counter.original_version(), NO_STREAM_VERSION);
        assert_eq!(counter.current_version(), NO_STREAM_VERSION);
        assert!(!counter.has_uncommitted_events());
    }

    #[test]
    fn test_apply_new_events_advances_version_by_one_each() {
        // Arrange
        let id = Uuid::new_v4();
        let mut counter = Counter::new(id);

        // Act / Assert
        for step in 0..4_i64 {
            counter.apply(incremented(1), true).unwrap();
            assert_eq!(counter.current_version(), step);
            let pending = i64::try_from(counter.uncommitted_events().len()).unwrap();
            assert_eq!(counter.current_version(), counter.original_version() + pending);
        }

        let sequence: Vec<i64> = counter
            .uncommitted_events()
            .iter()
            .map(|e| e.aggregate_sequence_number)
            .collect();
        assert_eq!(sequence, vec![0, 1, 2, 3]);
        assert!(counter.uncommitted_events().iter().all(|e| e.aggregate_id == id));
        assert_eq!(counter.total, 4);
    }

    #[test]
    fn test_apply_duplicate_event_is_rejected_without_state_change() {
        // Arrange
        let mut counter = Counter::new(Uuid::new_v4());
        let event = incremented(5);
        counter.apply(event.clone(), true).unwrap();

        // Act
        let result = counter.apply(event.clone(), true);

        // Assert
        match result {
            Err(DomainError::DuplicateEvent(id)) => assert_eq!(id, event.event_id),
            other => panic!("expected DuplicateEvent, got {other:?}"),
        }
        assert_eq!(counter.current_version(), 0);
        assert_eq!(counter.uncommitted_events().len(), 1);
        assert_eq!(counter.total, 5);
    }

    #[test]
    fn test_apply_unhandled_event_keeps_version_and_pending_list() {
        // Arrange
        let mut counter = Counter::new(Uuid::new_v4());
        counter.apply(incremented(2), true).unwrap();

        // Act
        let result = counter.apply(DomainEvent::new(CounterEvent::Retired, Utc::now()), true);

        // Assert
        let err = result.unwrap_err();
        assert!(matches!(
            err.root_cause(),
            DomainError::InvalidEventType { event_type, .. } if event_type == "counter.retired"
        ));
        assert_eq!(counter.current_version(), 0);
        assert_eq!(counter.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_apply_replayed_event_does_not_queue_it() {
        let id = Uuid::new_v4();
        let mut counter = Counter::new(id);

        counter
            .apply(incremented(3).with_aggregate(id, 0), false)
            .unwrap();

        assert_eq!(counter.current_version(), 0);
        assert_eq!(counter.original_version(), NO_STREAM_VERSION);
        assert!(!counter.has_uncommitted_events());
        assert_eq!(counter.total, 3);
    }

    #[test]
    fn test_mark_committed_clears_events_and_moves_original_version() {
        let mut counter = Counter::new(Uuid::new_v4());
        counter.apply(incremented(1), true).unwrap();

        counter.mark_uncommitted_events_as_committed();

        assert!(!counter.has_uncommitted_events());
        assert_eq!(counter.original_version(), 0);
        assert_eq!(counter.current_version(), 0);
    }

    #[test]
    fn test_load_from_history_advances_both_versions() {
        let id = Uuid::new_v4();
        let mut counter = Counter::new(id);

        counter
            .load_from_history(history(id, &[1, 2, 3]), &Metadata::new())
            .unwrap();

        assert_eq!(counter.original_version(), 2);
        assert_eq!(counter.current_version(), 2);
        assert!(!counter.has_uncommitted_events());
        assert_eq!(counter.total, 6);
    }

    #[test]
    fn test_load_from_history_is_deterministic() {
        let id = Uuid::new_v4();
        let mut events = history(id, &[4, 1]);
        events.push(DomainEvent::new(CounterEvent::Reset, Utc::now()).with_aggregate(id, 2));
        events.push(incremented(7).with_aggregate(id, 3));
        let mut first = Counter::new(id);
        let mut second = Counter::new(id);

        first.load_from_history(events.clone(), &Metadata::new()).unwrap();
        second.load_from_history(events, &Metadata::new()).unwrap();

        assert_eq!(first.total, second.total);
        assert_eq!(first.total, 7);
        assert_eq!(first.current_version(), second.current_version());
        assert_eq!(first.original_version(), second.original_version());
    }

    #[test]
    fn test_load_from_history_stops_at_first_failure() {
        let id = Uuid::new_v4();
        let events = vec![
            incremented(1).with_aggregate(id, 0),
            DomainEvent::new(CounterEvent::Retired, Utc::now()).with_aggregate(id, 1),
            incremented(10).with_aggregate(id, 2),
        ];
        let mut counter = Counter::new(id);

        let result = counter.load_from_history(events, &Metadata::new());

        assert!(matches!(result, Err(DomainError::Apply { .. })));
        assert_eq!(counter.current_version(), 0);
        assert_eq!(counter.total, 1);
    }

    #[test]
    fn test_apply_after_history_continues_sequence() {
        let id = Uuid::new_v4();
        let mut counter = Counter::new(id);
        counter
            .load_from_history(history(id, &[1]), &Metadata::new())
            .unwrap();

        counter.apply(incremented(1), true).unwrap();

        assert_eq!(counter.uncommitted_events()[0].aggregate_sequence_number, 1);
        assert_eq!(counter.original_version(), 0);
        assert_eq!(counter.current_version(), 1);
    }
}
