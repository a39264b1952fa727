//! Eventide Core: shared event-sourcing abstractions.
//!
//! This crate defines the aggregate state machine, the stream value types and
//! the contracts that event stores, projections and subscriptions implement.
//! It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod event;
pub mod projection;
pub mod registry;
pub mod serializer;
pub mod store;
pub mod stream;
pub mod subscription;
