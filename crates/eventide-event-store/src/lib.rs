//! Eventide Event Store: backing logs and repositories.
//!
//! This crate provides the in-memory and `PostgreSQL` implementations of the
//! `EventStore` and `LogSubscriber` traits, the typed `AggregateStore`, and
//! the checkpoint repositories used by subscriptions.

pub mod aggregate_store;
pub mod checkpoint;
pub mod config;
pub mod in_memory_event_store;
pub mod pg_event_store;
pub mod schema;
