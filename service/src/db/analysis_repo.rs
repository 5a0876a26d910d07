//! Parameterized SQL over the `analyses` table, guarded by `lock_version`.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Analysis, AnalysisOptions, AnalysisReport, ErrorDetail};

#[derive(Debug, Clone)]
pub struct AnalysisRepository {
    pool: PgPool,
}

impl AnalysisRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Analysis>, sqlx::Error> {
        sqlx::query_as::<_, Analysis>("SELECT * FROM analyses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// First completed analysis sharing `content_hash`, excluding `exclude_id` (the row
    /// currently being processed, which may itself already carry the hash).
    pub async fn find_completed_by_content_hash(
        &self,
        content_hash: &str,
        exclude_id: Uuid,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        sqlx::query_as::<_, Analysis>(
            "SELECT * FROM analyses \
             WHERE content_hash = $1 AND status = 'completed' AND id <> $2 \
             ORDER BY completed_at DESC NULLS LAST LIMIT 1",
        )
        .bind(content_hash)
        .bind(exclude_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Inserts a new analysis row inside `tx`, computing the next per-URL `version`
    /// so the caller can commit it atomically alongside the outbox event.
    pub async fn create_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        url: &str,
        url_normalized: &str,
        _options: &AnalysisOptions,
    ) -> Result<Analysis, sqlx::Error> {
        let next_version: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM analyses WHERE url_normalized = $1",
        )
        .bind(url_normalized)
        .fetch_one(&mut **tx)
        .await?;

        let name = format!("{url_normalized}:{next_version}");
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());

        sqlx::query_as::<_, Analysis>(
            "INSERT INTO analyses (id, url, url_normalized, version, lock_version, status, created_at) \
             VALUES ($1, $2, $3, $4, 0, 'requested', now()) \
             RETURNING *",
        )
        .bind(id)
        .bind(url)
        .bind(url_normalized)
        .bind(next_version)
        .fetch_one(&mut **tx)
        .await
    }

    /// `requested -> in_progress`, optimistic on `lock_version`. `None` means a
    /// concurrent worker already claimed (or completed) this analysis.
    pub async fn transition_to_in_progress(
        &self,
        id: Uuid,
        expected_lock_version: i32,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        sqlx::query_as::<_, Analysis>(
            "UPDATE analyses SET status = 'in_progress', lock_version = lock_version + 1 \
             WHERE id = $1 AND lock_version = $2 AND status = 'requested' \
             RETURNING *",
        )
        .bind(id)
        .bind(expected_lock_version)
        .fetch_optional(&self.pool)
        .await
    }

    /// `in_progress -> requested`, releasing a claim after a transient fetch
    /// failure so a broker-level requeue can be reclaimed by any worker.
    pub async fn revert_to_requested(
        &self,
        id: Uuid,
        expected_lock_version: i32,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        sqlx::query_as::<_, Analysis>(
            "UPDATE analyses SET status = 'requested', lock_version = lock_version + 1 \
             WHERE id = $1 AND lock_version = $2 AND status = 'in_progress' \
             RETURNING *",
        )
        .bind(id)
        .bind(expected_lock_version)
        .fetch_optional(&self.pool)
        .await
    }

    /// Persists `content_hash`/`content_size` as soon as they are known, ahead of
    /// the (possibly slower) analysis fan-out.
    pub async fn set_content_meta(
        &self,
        id: Uuid,
        lock_version: i32,
        content_hash: &str,
        content_size: i64,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        sqlx::query_as::<_, Analysis>(
            "UPDATE analyses SET content_hash = $3, content_size = $4, lock_version = lock_version + 1 \
             WHERE id = $1 AND lock_version = $2 \
             RETURNING *",
        )
        .bind(id)
        .bind(lock_version)
        .bind(content_hash)
        .bind(content_size)
        .fetch_optional(&self.pool)
        .await
    }

    /// `in_progress -> completed`, carrying the report (or a copy from a
    /// content-hash-deduplicated sibling).
    pub async fn complete(
        &self,
        id: Uuid,
        lock_version: i32,
        results: &AnalysisReport,
        duration_ms: i64,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        let results_json = serde_json::to_value(results).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )))
        })?;

        sqlx::query_as::<_, Analysis>(
            "UPDATE analyses SET status = 'completed', results = $3, duration_ms = $4, \
             completed_at = now(), lock_version = lock_version + 1 \
             WHERE id = $1 AND lock_version = $2 \
             RETURNING *",
        )
        .bind(id)
        .bind(lock_version)
        .bind(results_json)
        .bind(duration_ms)
        .fetch_optional(&self.pool)
        .await
    }

    /// `-> failed` (terminal). Accepted from either `requested` or `in_progress`.
    pub async fn fail(
        &self,
        id: Uuid,
        lock_version: i32,
        error: &ErrorDetail,
    ) -> Result<Option<Analysis>, sqlx::Error> {
        let error_json = serde_json::to_value(error).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )))
        })?;

        sqlx::query_as::<_, Analysis>(
            "UPDATE analyses SET status = 'failed', error = $3, completed_at = now(), \
             lock_version = lock_version + 1 \
             WHERE id = $1 AND lock_version = $2 \
             RETURNING *",
        )
        .bind(id)
        .bind(lock_version)
        .bind(error_json)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, HtmlVersion};

    #[test]
    fn report_serializes_for_json_column() {
        let report = AnalysisReport {
            html_version: HtmlVersion::Html5,
            title: "Example".to_string(),
            headings: Default::default(),
            links: Default::default(),
            forms: Default::default(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["title"], "Example");
    }

    #[test]
    fn status_round_trips_through_snake_case() {
        let json = serde_json::to_string(&AnalysisStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn analysis_id_is_deterministic_for_url_and_version() {
        let name = format!("{}:{}", "https://example.com/", 1);
        let a = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        let b = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        assert_eq!(a, b);

        let other_version = format!("{}:{}", "https://example.com/", 2);
        let c = Uuid::new_v5(&Uuid::NAMESPACE_OID, other_version.as_bytes());
        assert_ne!(a, c);
    }
}
