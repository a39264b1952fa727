//! Integration tests for `AggregateStore` over the in-memory event store.

use std::sync::Arc;

use eventide_core::aggregate::AggregateRoot;
use eventide_core::error::DomainError;
use eventide_core::event::{DomainEvent, Metadata, StreamEvent};
use eventide_core::registry::AggregateRegistry;
use eventide_core::serializer::{EventSerializer, JsonEventSerializer};
use eventide_core::store::EventStore;
use eventide_core::stream::{ExpectedStreamVersion, NO_STREAM_VERSION, StreamReadPosition};
use eventide_event_store::aggregate_store::AggregateStore;
use eventide_event_store::config::AggregateStoreConfig;
use eventide_event_store::in_memory_event_store::InMemoryEventStore;
use eventide_test_support::{
    AccountEventKind, BankAccount, FailingEventStore, FixedClock, account_registry,
};
use uuid::Uuid;

fn account_store(event_store: &InMemoryEventStore) -> AggregateStore<BankAccount> {
    AggregateStore::new(Arc::new(event_store.clone()), Arc::new(account_registry()))
}

/// Opens an account with `deposits` extra deposits and stores it.
async fn stored_account(store: &AggregateStore<BankAccount>, deposits: usize) -> BankAccount {
    let clock = FixedClock::standard();
    let mut account = BankAccount::open(Uuid::new_v4(), "Ada", &clock).unwrap();
    for _ in 0..deposits {
        account.deposit(10, &clock).unwrap();
    }
    store.store(&mut account, &Metadata::new()).await.unwrap();
    account
}

// --- store ---

#[tokio::test]
async fn test_store_single_created_event_commits_version_zero() {
    // Arrange
    let store = account_store(&InMemoryEventStore::new());
    let mut account =
        BankAccount::open(Uuid::new_v4(), "Ada", &FixedClock::standard()).unwrap();
    assert_eq!(account.original_version(), NO_STREAM_VERSION);

    // Act
    let result = store.store(&mut account, &Metadata::new()).await.unwrap();

    // Assert
    assert_eq!(account.original_version(), 0);
    assert_eq!(account.current_version(), 0);
    assert!(!account.has_uncommitted_events());
    assert_eq!(result.next_expected_version, 0);
}

#[tokio::test]
async fn test_store_failure_keeps_uncommitted_events() {
    // Arrange
    let store: AggregateStore<BankAccount> =
        AggregateStore::new(Arc::new(FailingEventStore), Arc::new(account_registry()));
    let mut account =
        BankAccount::open(Uuid::new_v4(), "Ada", &FixedClock::standard()).unwrap();

    // Act
    let result = store.store(&mut account, &Metadata::new()).await;

    // Assert
    assert!(matches!(result, Err(DomainError::Append { .. })));
    assert!(account.has_uncommitted_events());
    assert_eq!(account.original_version(), NO_STREAM_VERSION);
}

#[tokio::test]
async fn test_store_twice_with_new_events_appends_to_stream() {
    let clock = FixedClock::standard();
    let store = account_store(&InMemoryEventStore::new());
    let mut account = stored_account(&store, 0).await;

    account.deposit(25, &clock).unwrap();
    let result = store.store(&mut account, &Metadata::new()).await.unwrap();

    assert_eq!(result.next_expected_version, 1);
    assert_eq!(account.original_version(), 1);
}

// --- load ---

#[tokio::test]
async fn test_store_then_load_round_trips_state() {
    // Arrange
    let clock = FixedClock::standard();
    let store = account_store(&InMemoryEventStore::new());
    let mut account = BankAccount::open(Uuid::new_v4(), "Grace", &clock).unwrap();
    account.deposit(500, &clock).unwrap();
    account.withdraw(120, &clock).unwrap();
    store.store(&mut account, &Metadata::new()).await.unwrap();

    // Act
    let loaded = store.load(account.aggregate_id()).await.unwrap();

    // Assert
    assert_eq!(loaded.owner, account.owner);
    assert_eq!(loaded.balance, 380);
    assert_eq!(loaded.current_version(), account.current_version());
    assert_eq!(loaded.original_version(), account.original_version());
    assert!(!loaded.has_uncommitted_events());
}

#[tokio::test]
async fn test_apply_three_events_to_loaded_aggregate_then_reload() {
    // Arrange
    let clock = FixedClock::standard();
    let store = account_store(&InMemoryEventStore::new());
    let id = stored_account(&store, 0).await.aggregate_id();
    let mut account = store.load(id).await.unwrap();

    // Act
    account.deposit(1, &clock).unwrap();
    account.deposit(2, &clock).unwrap();
    account.deposit(3, &clock).unwrap();
    store.store(&mut account, &Metadata::new()).await.unwrap();
    let reloaded = store.load(id).await.unwrap();

    // Assert
    assert_eq!(reloaded.current_version(), 3);
    assert_eq!(reloaded.balance, 6);
}

#[tokio::test]
async fn test_paged_load_matches_single_page_load() {
    // Arrange
    let event_store = InMemoryEventStore::new();
    let store = account_store(&event_store);
    let paged = account_store(&event_store).with_config(AggregateStoreConfig::new(3).unwrap());
    let exact = account_store(&event_store).with_config(AggregateStoreConfig::new(4).unwrap());
    let id = stored_account(&store, 11).await.aggregate_id();

    // Act
    let whole = store.load(id).await.unwrap();
    let in_pages = paged.load(id).await.unwrap();
    let in_full_pages = exact.load(id).await.unwrap();

    // Assert
    assert_eq!(whole.current_version(), 11);
    for loaded in [&in_pages, &in_full_pages] {
        assert_eq!(loaded.current_version(), whole.current_version());
        assert_eq!(loaded.balance, whole.balance);
    }
}

#[tokio::test]
async fn test_zero_page_size_cannot_be_configured() {
    // Arrange
    let event_store = InMemoryEventStore::new();
    let id = stored_account(&account_store(&event_store), 2)
        .await
        .aggregate_id();
    let one_per_page =
        account_store(&event_store).with_config(AggregateStoreConfig::new(1).unwrap());

    // Act
    let zero = AggregateStoreConfig::new(0);
    let loaded = one_per_page.load(id).await.unwrap();

    // Assert
    assert!(zero.is_err());
    assert_eq!(loaded.current_version(), 2);
}

#[tokio::test]
async fn test_load_with_read_position_skips_earlier_events() {
    let event_store = InMemoryEventStore::new();
    let store = account_store(&event_store);
    let id = stored_account(&store, 4).await.aggregate_id();

    let partial = store
        .load_with_read_position(id, StreamReadPosition::Offset(3))
        .await
        .unwrap();

    assert_eq!(partial.balance, 20);
    assert_eq!(partial.current_version(), 1);
}

#[tokio::test]
async fn test_load_missing_aggregate_is_not_found() {
    let store = account_store(&InMemoryEventStore::new());
    let id = Uuid::new_v4();

    let result = store.load(id).await;

    match result {
        Err(DomainError::AggregateNotFound {
            aggregate_type,
            aggregate_id,
        }) => {
            assert_eq!(aggregate_type, "BankAccount");
            assert_eq!(aggregate_id, id);
        }
        other => panic!("expected AggregateNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_load_past_end_is_not_found() {
    let store = account_store(&InMemoryEventStore::new());
    let id = stored_account(&store, 1).await.aggregate_id();

    let result = store
        .load_with_read_position(id, StreamReadPosition::End)
        .await;

    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_load_unregistered_aggregate_fails() {
    let event_store = InMemoryEventStore::new();
    let id = stored_account(&account_store(&event_store), 0)
        .await
        .aggregate_id();
    let store: AggregateStore<BankAccount> =
        AggregateStore::new(Arc::new(event_store), Arc::new(AggregateRegistry::new()));

    let result = store.load(id).await;

    assert!(matches!(result, Err(DomainError::UnregisteredAggregate(_))));
}

#[tokio::test]
async fn test_load_unhandled_event_type_is_fatal() {
    // Arrange
    let clock = FixedClock::standard();
    let event_store = InMemoryEventStore::new();
    let store = account_store(&event_store);
    let id = stored_account(&store, 0).await.aggregate_id();
    let retired = DomainEvent::new(AccountEventKind::InterestAccrued { amount: 1 }, clock.0)
        .with_aggregate(id, 1);
    let data = JsonEventSerializer
        .serialize(&StreamEvent::new(retired, 1, Metadata::new()))
        .unwrap();
    event_store
        .append_events(
            &AggregateStore::<BankAccount>::stream_name(id),
            ExpectedStreamVersion::Exact(0),
            vec![data],
        )
        .await
        .unwrap();

    // Act
    let result = store.load(id).await;

    // Assert
    let err = result.unwrap_err();
    assert!(matches!(err, DomainError::Apply { .. }));
    assert!(matches!(
        err.root_cause(),
        DomainError::InvalidEventType { aggregate_type, event_type }
            if aggregate_type == "BankAccount" && event_type == "account.interest_accrued"
    ));
}

#[tokio::test]
async fn test_load_transport_failure_is_surfaced() {
    let store: AggregateStore<BankAccount> =
        AggregateStore::new(Arc::new(FailingEventStore), Arc::new(account_registry()));

    let result = store.load(Uuid::new_v4()).await;

    assert!(matches!(result, Err(DomainError::Read { .. })));
}

// --- concurrency ---

#[tokio::test]
async fn test_concurrent_stale_stores_exactly_one_wins() {
    // Arrange
    let clock = FixedClock::standard();
    let event_store = InMemoryEventStore::new();
    let store = Arc::new(account_store(&event_store));
    let id = stored_account(&store, 0).await.aggregate_id();
    let mut first = store.load(id).await.unwrap();
    let mut second = store.load(id).await.unwrap();
    first.deposit(10, &clock).unwrap();
    second.deposit(20, &clock).unwrap();

    // Act
    let a = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.store(&mut first, &Metadata::new()).await })
    };
    let b = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.store(&mut second, &Metadata::new()).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    // Assert
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let conflict = results.into_iter().find_map(Result::err).unwrap();
    assert!(conflict.is_concurrency_conflict());
    assert_eq!(store.load(id).await.unwrap().current_version(), 1);
}

// --- exists ---

#[tokio::test]
async fn test_exists_reflects_stream_presence() {
    let store = account_store(&InMemoryEventStore::new());
    let id = stored_account(&store, 0).await.aggregate_id();

    assert!(store.exists(id).await.unwrap());
    assert!(!store.exists(Uuid::new_v4()).await.unwrap());
}
