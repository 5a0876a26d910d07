//! Durable pending/retryable event log with claim-based exclusive ownership.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::model::{NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus};

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new outbox row on the given transaction. Callers insert the
    /// aggregate row on the same transaction so both commit atomically.
    async fn save_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &NewOutboxEvent,
    ) -> OutboxResult<OutboxEvent>;

    /// `pending` events ordered by `priority DESC, created_at ASC`.
    async fn find_pending(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// `failed` events whose `next_retry_at` is due and budget remains,
    /// ordered by `next_retry_at ASC`.
    async fn find_retryable(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// Atomically move `pending|failed → processing`. Returns `None` if
    /// another actor already claimed the row (or it's no longer claimable).
    async fn claim_for_processing(&self, id: Uuid) -> OutboxResult<Option<OutboxEvent>>;

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()>;

    /// Transient failure: bump `retry_count`, record `error_details`, and
    /// schedule the next attempt at `next_retry_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error_details: &str,
        next_retry_at: DateTime<Utc>,
    ) -> OutboxResult<()>;

    /// Terminal failure: `next_retry_at` is cleared so the row is never
    /// rescanned.
    async fn mark_permanently_failed(&self, id: Uuid, error_details: &str) -> OutboxResult<()>;

    async fn pending_stats(&self) -> OutboxResult<OutboxStats>;
}

#[derive(Clone)]
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Operational escape hatch: reset terminally-failed events created since
    /// `since` back to `pending` so the publisher picks them up again.
    pub async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                retry_count = 0,
                error_details = NULL,
                next_retry_at = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE status = 'failed' AND next_retry_at IS NULL AND created_at >= $1
            "#,
        )
        .bind(since)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Reset terminally-failed events whose id falls within `[from, to]` back
    /// to `pending`. Ids are UUIDv5-derived, not sequential, so this is a
    /// coarse operational tool rather than a precise range scan.
    pub async fn replay_range(&self, from: Uuid, to: Uuid) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                retry_count = 0,
                error_details = NULL,
                next_retry_at = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE status = 'failed' AND next_retry_at IS NULL AND id BETWEEN $1 AND $2
            "#,
        )
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn save_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &NewOutboxEvent,
    ) -> OutboxResult<OutboxEvent> {
        let row = sqlx::query_as::<_, OutboxEvent>(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, priority, status,
                 retry_count, max_retries, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, now())
            RETURNING id, aggregate_type, aggregate_id, event_type, priority, status,
                      retry_count, max_retries, payload, error_details, created_at,
                      started_at, published_at, processed_at, completed_at, next_retry_at
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(event.priority)
        .bind(event.max_retries)
        .bind(&event.payload)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    async fn find_pending(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, priority, status,
                   retry_count, max_retries, payload, error_details, created_at,
                   started_at, published_at, processed_at, completed_at, next_retry_at
            FROM outbox_events
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_retryable(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, priority, status,
                   retry_count, max_retries, payload, error_details, created_at,
                   started_at, published_at, processed_at, completed_at, next_retry_at
            FROM outbox_events
            WHERE status = 'failed'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= now()
              AND retry_count < max_retries
            ORDER BY next_retry_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn claim_for_processing(&self, id: Uuid) -> OutboxResult<Option<OutboxEvent>> {
        let row = sqlx::query_as::<_, OutboxEvent>(
            r#"
            UPDATE outbox_events
            SET status = 'processing', started_at = now()
            WHERE id = $1 AND status IN ('pending', 'failed')
            RETURNING id, aggregate_type, aggregate_id, event_type, priority, status,
                      retry_count, max_retries, payload, error_details, created_at,
                      started_at, published_at, processed_at, completed_at, next_retry_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'published', published_at = now(), processed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_details: &str,
        next_retry_at: DateTime<Utc>,
    ) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed',
                retry_count = retry_count + 1,
                error_details = $2,
                next_retry_at = $3,
                processed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_details)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(id));
        }
        Ok(())
    }

    async fn mark_permanently_failed(&self, id: Uuid, error_details: &str) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed',
                retry_count = retry_count + 1,
                error_details = $2,
                next_retry_at = NULL,
                completed_at = now(),
                processed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_details)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(id));
        }
        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<OutboxStats> {
        let row = sqlx::query_as::<_, (i64, i64, Option<f64>)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                COUNT(*) FILTER (WHERE status = 'failed' AND next_retry_at IS NOT NULL) AS failed_count,
                EXTRACT(EPOCH FROM (now() - MIN(created_at) FILTER (WHERE status = 'pending')))
            FROM outbox_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending_count: row.0,
            failed_count: row.1,
            oldest_pending_age_seconds: row.2.unwrap_or(0.0) as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use serde_json::json;

    #[test]
    fn new_event_carries_priority_retry_budget() {
        let event = NewOutboxEvent::new(
            "analysis",
            Uuid::new_v4(),
            "analysis.requested",
            Priority::High,
            json!({"url": "https://example.com"}),
        );
        assert_eq!(event.max_retries, 7);
        assert_eq!(event.priority, Priority::High);
    }
}
