//! Shared test doubles and fixtures for the Eventide crates.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

mod account;
mod bus;
mod checkpoint;
mod clock;
mod journal;
mod projection;
mod store;
mod subscriber;

pub use account::{
    ACCOUNT_OPENED_EVENT_TYPE, AccountEventKind, BankAccount, FUNDS_DEPOSITED_EVENT_TYPE,
    FUNDS_WITHDRAWN_EVENT_TYPE, INTEREST_ACCRUED_EVENT_TYPE, account_registry,
};
pub use bus::RecordingEventBus;
pub use checkpoint::InMemoryCheckpointRepository;
pub use clock::FixedClock;
pub use journal::CallJournal;
pub use projection::RecordingProjection;
pub use store::FailingEventStore;
pub use subscriber::{FlakySubscriber, SubscribeFault};

/// Installs a test-friendly tracing subscriber, filtered by `RUST_LOG`
/// (default `warn`). Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
