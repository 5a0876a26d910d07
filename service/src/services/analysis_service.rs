//! Application service: the HTTP surface's only entry point into the
//! repository/cache/outbox layers.

use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use transactional_outbox::{NewOutboxEvent, OutboxRepository, Priority, SqlxOutboxRepository};

use crate::cache::AnalysisCache;
use crate::db::AnalysisRepository;
use crate::error::AppError;
use crate::models::{Analysis, AnalysisEvent, AnalysisOptions};
use crate::normalize::normalize_url;

const AGGREGATE_TYPE: &str = "analysis";
const EVENT_TYPE_REQUESTED: &str = "analysis.requested";

/// Bounded channel capacity for a single SSE subscriber; a slow client drops
/// rather than back-pressuring the poller.
const SSE_CHANNEL_CAPACITY: usize = 10;

pub struct AnalysisService {
    pool: PgPool,
    repo: AnalysisRepository,
    outbox: SqlxOutboxRepository,
    cache: Arc<AnalysisCache>,
    poll_interval: Duration,
    normal_priority_max_retries: i32,
}

impl AnalysisService {
    pub fn new(
        pool: PgPool,
        cache: Arc<AnalysisCache>,
        poll_interval: Duration,
        normal_priority_max_retries: i32,
    ) -> Self {
        Self {
            repo: AnalysisRepository::new(pool.clone()),
            outbox: SqlxOutboxRepository::new(pool.clone()),
            pool,
            cache,
            poll_interval,
            normal_priority_max_retries,
        }
    }

    /// Validates and normalizes `url`, inserts the `requested` analysis row and
    /// its outbox event in one transaction, and returns the created row.
    pub async fn start_analysis(
        &self,
        url: &str,
        options: AnalysisOptions,
    ) -> Result<Analysis, AppError> {
        let normalized = normalize_url(url).map_err(AppError::InvalidUrl)?;

        let mut tx = self.pool.begin().await?;

        let analysis = AnalysisRepository::create_in_tx(&mut tx, url, &normalized, &options)
            .await
            .map_err(AppError::from)?;

        let payload = json!({
            "analysis_id": analysis.id,
            "url": analysis.url,
            "options": options,
        });

        let event = NewOutboxEvent::with_max_retries(
            AGGREGATE_TYPE,
            analysis.id,
            EVENT_TYPE_REQUESTED,
            Priority::Normal,
            self.normal_priority_max_retries,
            payload,
        );

        self.outbox
            .save_in_tx(&mut tx, &event)
            .await
            .map_err(AppError::from)?;

        tx.commit().await?;

        crate::metrics::pipeline::record_requested();
        info!(analysis_id = %analysis.id, url = %analysis.url, "analysis requested");

        self.cache.set(&analysis).await;

        Ok(analysis)
    }

    /// Read-through: cache first, falling back to the database and warming
    /// the cache on a hit there.
    pub async fn fetch_analysis(&self, id: Uuid) -> Result<Analysis, AppError> {
        if let Some(cached) = self.cache.get(id).await {
            return Ok(cached);
        }

        let analysis = self
            .repo
            .find_by_id(id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("analysis {id} not found")))?;

        self.cache.set(&analysis).await;

        Ok(analysis)
    }

    /// Spawns a poller that pushes an `AnalysisEvent` onto the returned
    /// channel whenever the row's `lock_version` changes, and again once it
    /// reaches a terminal state. The poller exits on terminal state, on
    /// receiver drop, or after `max_ticks` with no progress (analysis id
    /// vanished or is stuck).
    pub fn fetch_analysis_events(&self, id: Uuid) -> mpsc::Receiver<AnalysisEvent> {
        let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        let repo = AnalysisRepository::new(self.pool.clone());
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last_lock_version: Option<i32> = None;
            let mut sent_first = false;

            loop {
                if tx.is_closed() {
                    debug!(analysis_id = %id, "sse receiver dropped, stopping poller");
                    break;
                }

                let analysis = match repo.find_by_id(id).await {
                    Ok(Some(a)) => a,
                    Ok(None) => {
                        warn!(analysis_id = %id, "analysis disappeared while streaming events");
                        break;
                    }
                    Err(e) => {
                        warn!(analysis_id = %id, error = %e, "poll failed while streaming events");
                        break;
                    }
                };

                let changed = last_lock_version != Some(analysis.lock_version);
                if changed || !sent_first {
                    last_lock_version = Some(analysis.lock_version);
                    let is_first = !sent_first;
                    sent_first = true;

                    let terminal = analysis.status == crate::models::AnalysisStatus::Completed
                        || analysis.status == crate::models::AnalysisStatus::Failed;
                    let event = AnalysisEvent::from_status(analysis, is_first);

                    match tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(analysis_id = %id, "sse channel full, skipping tick");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                    if terminal {
                        break;
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        });

        rx
    }
}
