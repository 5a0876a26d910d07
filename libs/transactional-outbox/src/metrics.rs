use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub failed: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published_total: IntCounter,
    pub publish_failed_total: IntCounter,
    pub permanently_failed_total: IntCounter,
    pub claimed_total: IntCounter,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "outbox_pending_count",
                "Number of unpublished outbox events currently pending",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_pending_count");

        let failed = IntGauge::with_opts(
            Opts::new(
                "outbox_failed_count",
                "Number of outbox events currently in a retryable failed state",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_failed_count");

        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "outbox_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending outbox event",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_oldest_pending_age_seconds");

        let published_total = IntCounter::with_opts(
            Opts::new(
                "outbox_published_total",
                "Total number of outbox events marked as published",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_published_total");

        let publish_failed_total = IntCounter::with_opts(
            Opts::new(
                "outbox_publish_failed_total",
                "Total number of transient publish failures (retried)",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_publish_failed_total");

        let permanently_failed_total = IntCounter::with_opts(
            Opts::new(
                "outbox_permanently_failed_total",
                "Total number of events that exhausted their retry budget",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_permanently_failed_total");

        let claimed_total = IntCounter::with_opts(
            Opts::new(
                "outbox_claimed_total",
                "Total number of successful atomic claims",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_claimed_total");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(failed.clone()),
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(published_total.clone()),
            Box::new(publish_failed_total.clone()),
            Box::new(permanently_failed_total.clone()),
            Box::new(claimed_total.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Self {
            pending,
            failed,
            oldest_pending_age_seconds,
            published_total,
            publish_failed_total,
            permanently_failed_total,
            claimed_total,
        }
    }
}
