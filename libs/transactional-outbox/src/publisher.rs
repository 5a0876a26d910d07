//! The outbox publisher: a single background actor per process that scans
//! pending/retryable events, claims them exclusively, and hands them to the
//! broker.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backoff::{next_delay, BackoffConfig};
use crate::error::OutboxResult;
use crate::metrics::OutboxMetrics;
use crate::model::OutboxEvent;
use crate::repository::OutboxRepository;

/// Abstraction over "send this event to the broker", so the processor can be
/// driven against a mock in tests without a live AMQP connection.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl EventPublisher for broker::Broker {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> anyhow::Result<()> {
        broker::Broker::publish(self, routing_key, payload)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub tick_interval: Duration,
    pub batch_size: i64,
    pub publish_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            batch_size: 10,
            publish_timeout: Duration::from_secs(3),
            backoff: BackoffConfig::default(),
        }
    }
}

pub struct OutboxProcessor<R: OutboxRepository, P: EventPublisher> {
    repo: Arc<R>,
    publisher: Arc<P>,
    metrics: OutboxMetrics,
    config: OutboxProcessorConfig,
}

impl<R: OutboxRepository, P: EventPublisher> OutboxProcessor<R, P> {
    pub fn new(
        repo: Arc<R>,
        publisher: Arc<P>,
        metrics: OutboxMetrics,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            repo,
            publisher,
            metrics,
            config,
        }
    }

    /// Run the tick loop until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("outbox processor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "outbox tick failed");
                    }
                }
            }
        }
    }

    /// One scheduling tick: scan pending, scan retryable-failed, attempt to
    /// claim and publish each candidate, then refresh the gauges.
    pub async fn tick(&self) -> OutboxResult<()> {
        let pending = self.repo.find_pending(self.config.batch_size).await?;
        let retryable = self.repo.find_retryable(self.config.batch_size).await?;

        for candidate in pending.into_iter().chain(retryable.into_iter()) {
            self.process_one(candidate).await;
        }

        if let Ok(stats) = self.repo.pending_stats().await {
            self.metrics.pending.set(stats.pending_count);
            self.metrics.failed.set(stats.failed_count);
            self.metrics
                .oldest_pending_age_seconds
                .set(stats.oldest_pending_age_seconds);
        }

        Ok(())
    }

    async fn process_one(&self, candidate: OutboxEvent) {
        let claimed = match self.repo.claim_for_processing(candidate.id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event_id = %candidate.id, "claim missed, another actor won");
                return;
            }
            Err(e) => {
                warn!(event_id = %candidate.id, error = %e, "claim failed");
                return;
            }
        };
        self.metrics.claimed_total.inc();

        let payload = match serde_json::to_vec(&claimed.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.settle_failure(&claimed, &e.to_string()).await;
                return;
            }
        };

        let publish_result = tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish(&claimed.event_type, &payload),
        )
        .await;

        match publish_result {
            Ok(Ok(())) => {
                if let Err(e) = self.repo.mark_published(claimed.id).await {
                    error!(event_id = %claimed.id, error = %e, "failed to mark published");
                } else {
                    self.metrics.published_total.inc();
                    info!(event_id = %claimed.id, event_type = %claimed.event_type, "published");
                }
            }
            Ok(Err(e)) => self.settle_failure(&claimed, &e.to_string()).await,
            Err(_) => self.settle_failure(&claimed, "publish timed out").await,
        }
    }

    async fn settle_failure(&self, event: &OutboxEvent, message: &str) {
        let next_retry_count = event.retry_count + 1;
        if next_retry_count >= event.max_retries {
            if let Err(e) = self.repo.mark_permanently_failed(event.id, message).await {
                error!(event_id = %event.id, error = %e, "failed to mark permanently failed");
            } else {
                self.metrics.permanently_failed_total.inc();
                warn!(event_id = %event.id, "retry budget exhausted, terminal failure");
            }
            return;
        }

        let delay = next_delay(event.retry_count as u32, &self.config.backoff);
        let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        if let Err(e) = self
            .repo
            .mark_failed(event.id, message, next_retry_at)
            .await
        {
            error!(event_id = %event.id, error = %e, "failed to mark failed");
        } else {
            self.metrics.publish_failed_total.inc();
            warn!(event_id = %event.id, retry_count = next_retry_count, "publish failed, will retry");
        }
    }
}
