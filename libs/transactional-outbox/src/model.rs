//! Outbox event shape: the durable record of an intended broker publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery priority. Determines scan order and the retry budget (`max_retries`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Default `max_retries` budget per priority tier, overridable via config.
    pub fn default_max_retries(self) -> i32 {
        match self {
            Priority::Low => 3,
            Priority::Normal => 5,
            Priority::High => 7,
            Priority::Urgent => 10,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Outbox row lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

/// A durable, at-least-once event awaiting delivery to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub priority: Priority,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub payload: Value,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a new outbox row; everything else defaults to the
/// `pending` initial state.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub priority: Priority,
    pub max_retries: i32,
    pub payload: Value,
}

impl NewOutboxEvent {
    /// Build a new event with an id derived deterministically (UUIDv5) from
    /// `aggregate_id`, `event_type` and the creation instant, and `max_retries`
    /// taken from the priority's default budget.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        priority: Priority,
        payload: Value,
    ) -> Self {
        Self::with_max_retries(
            aggregate_type,
            aggregate_id,
            event_type,
            priority,
            priority.default_max_retries(),
            payload,
        )
    }

    /// Same as `new`, but with an explicit `max_retries` budget (e.g. sourced
    /// from the caller's own configuration rather than the built-in default).
    pub fn with_max_retries(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        priority: Priority,
        max_retries: i32,
        payload: Value,
    ) -> Self {
        let event_type = event_type.into();
        let now = Utc::now();
        let name = format!("{aggregate_id}:{event_type}:{}", now.timestamp_nanos_opt().unwrap_or_default());
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());

        Self {
            id,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type,
            max_retries,
            priority,
            payload,
        }
    }
}

/// Aggregate counters over the pending/failed backlog, used for metrics and
/// operational visibility.
#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub pending_count: i64,
    pub failed_count: i64,
    pub oldest_pending_age_seconds: i64,
}
