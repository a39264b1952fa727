//! Catch-up subscriptions for Eventide.
//!
//! A [`worker::SubscriptionWorker`] tails the whole backing log from its last
//! checkpoint and forwards every event to an [`eventide_core::bus::EventBus`]
//! and then to the projections of a
//! [`projection_publisher::SequentialProjectionPublisher`].

pub mod bus;
pub mod config;
pub mod projection_publisher;
pub mod worker;
