//! # Transactional Outbox Pattern Implementation
//!
//! This library implements the Transactional Outbox pattern to ensure reliable event publishing
//! in the analysis pipeline. It guarantees that database writes and event publishing happen
//! atomically, preventing data inconsistencies.
//!
//! ## What is the Transactional Outbox Pattern?
//!
//! The Transactional Outbox pattern ensures that:
//! 1. Business logic changes (database writes) and event creation happen in the same transaction
//! 2. Events are stored in an "outbox" table within the same database
//! 3. A background processor claims unpublished events and publishes them to the broker
//! 4. Events are marked as published only after successful broker delivery
//!
//! This guarantees **at-least-once delivery** and prevents event loss even if:
//! - The service crashes after database commit but before broker publish
//! - The broker is temporarily unavailable
//! - Network partitions occur
//!
//! ## Usage
//!
//! Insert the aggregate row and the outbox row in the same transaction via
//! [`OutboxRepository::save_in_tx`], then run an [`OutboxProcessor`] as a
//! background task to claim, publish, and settle events.

pub mod backoff;
mod error;
mod metrics;
mod model;
mod publisher;
mod repository;

pub use backoff::{next_delay, BackoffConfig};
pub use error::{OutboxError, OutboxResult};
pub use metrics::OutboxMetrics;
pub use model::{NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus, Priority};
pub use publisher::{EventPublisher, OutboxProcessor, OutboxProcessorConfig};
pub use repository::{OutboxRepository, SqlxOutboxRepository};
