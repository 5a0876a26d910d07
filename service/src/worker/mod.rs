//! The subscriber: the consume-loop body handed to `broker::Broker::consume`.
//!
//! Turns an `analysis.requested` delivery into a claimed, fetched, analyzed and
//! persisted `Analysis` row, with idempotent-consumer as a defense-in-depth
//! backstop against broker-level redelivery on top of the repository's own
//! optimistic `lock_version` guard.

pub mod subscriber;

pub use subscriber::{handle_delivery, WorkerContext};
