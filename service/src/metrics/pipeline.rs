//! Prometheus metrics for the analysis pipeline: intake, fetch, and the
//! worker's fan-out stages.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

/// Analyses requested via the HTTP intake endpoint.
static ANALYSES_REQUESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analyses_requested_total",
        "Total analyses accepted at intake",
        &["status"]
    )
    .expect("failed to register analyses_requested_total")
});

/// Outcome of the worker's end-to-end pipeline per delivery.
static ANALYSES_COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analyses_completed_total",
        "Total analyses reaching a terminal state, segmented by outcome",
        &["outcome"]
    )
    .expect("failed to register analyses_completed_total")
});

/// Wall-clock duration of the worker's fetch-to-persist pipeline.
static ANALYSIS_PIPELINE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "analysis_pipeline_duration_seconds",
        "Duration of the fetch/analyze/persist pipeline segmented by outcome",
        &["outcome"],
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register analysis_pipeline_duration_seconds")
});

/// Content-hash dedup hits, avoiding a repeat fetch/analyze fan-out.
static ANALYSES_DEDUPLICATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "analyses_deduplicated_total",
        "Analyses completed by copying a content-hash-matching sibling"
    )
    .expect("failed to register analyses_deduplicated_total")
});

pub fn record_requested() {
    ANALYSES_REQUESTED_TOTAL.with_label_values(&["requested"]).inc();
}

pub fn record_completed(outcome: &str, duration_secs: f64) {
    ANALYSES_COMPLETED_TOTAL.with_label_values(&[outcome]).inc();
    ANALYSIS_PIPELINE_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_deduplicated() {
    ANALYSES_DEDUPLICATED_TOTAL.inc();
}
