use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use broker::{BrokerError, DeliveryController};
use idempotent_consumer::{IdempotencyGuard, ProcessingResult};

use crate::analyzer;
use crate::cache::AnalysisCache;
use crate::db::AnalysisRepository;
use crate::error::AppError;
use crate::fetcher::Fetcher;
use crate::linkcheck::LinkChecker;
use crate::models::{
    AnalysisOptions, AnalysisReport, AnalysisStatus, ErrorDetail, FormSummary, HeadingCounts,
    LinkSummary,
};

/// The outbox payload published under the `analysis.requested` routing key.
#[derive(Debug, Clone, Deserialize)]
struct AnalysisRequestedPayload {
    analysis_id: Uuid,
    url: String,
    #[serde(default)]
    options: AnalysisOptions,
}

/// Everything the subscriber needs to run the fetch/analyze/persist pipeline,
/// shared across deliveries via `Arc`.
pub struct WorkerContext {
    pub repo: AnalysisRepository,
    pub cache: Arc<AnalysisCache>,
    pub fetcher: Arc<Fetcher>,
    pub link_checker: Arc<LinkChecker>,
    pub idempotency: Arc<IdempotencyGuard>,
}

/// The closure passed to `Broker::consume`: parse, idempotency-gate, process,
/// then settle the delivery according to the outcome.
pub async fn handle_delivery(ctx: Arc<WorkerContext>, controller: DeliveryController) {
    let payload: AnalysisRequestedPayload = match serde_json::from_slice(controller.data()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "malformed analysis.requested payload, rejecting permanently");
            if let Err(e) = controller.reject().await {
                warn!(error = %e, "failed to reject malformed delivery");
            }
            return;
        }
    };

    let event_id = payload.analysis_id.to_string();
    let retry_count = controller.retry_count();

    let worker_ctx = ctx.clone();
    let outcome = ctx
        .idempotency
        .process_if_new(&event_id, || process(worker_ctx, payload))
        .await;

    match outcome {
        Ok(ProcessingResult::Success) => {
            if let Err(e) = controller.ack().await {
                warn!(error = %e, "failed to ack processed delivery");
            }
        }
        Ok(ProcessingResult::AlreadyProcessed) => {
            info!(analysis_id = %event_id, "duplicate delivery, analysis already processed");
            if let Err(e) = controller.ack().await {
                warn!(error = %e, "failed to ack duplicate delivery");
            }
        }
        Ok(ProcessingResult::Failed(msg)) => {
            warn!(analysis_id = %event_id, retry_count, error = %msg, "analysis processing failed");
            settle_requeue(&ctx, &event_id, &msg, controller).await;
        }
        Err(e) => {
            error!(analysis_id = %event_id, error = %e, "idempotency guard error");
            let msg = e.to_string();
            settle_requeue(&ctx, &event_id, &msg, controller).await;
        }
    }
}

/// Requeues a failed delivery, bounded by the broker's `x-retry-count` cap.
/// When the cap is exceeded the message is already gone (permanently
/// rejected by `requeue()` itself), so the analysis row must be moved to its
/// own terminal state here or it would be stuck non-terminal forever.
async fn settle_requeue(ctx: &WorkerContext, analysis_id: &str, message: &str, controller: DeliveryController) {
    match controller.requeue().await {
        Ok(()) => {}
        Err(BrokerError::RetryCountExceeded(cap)) => {
            warn!(analysis_id, cap, "requeue cap exceeded, analysis permanently failed");
            mark_max_retries_exceeded(ctx, analysis_id, message).await;
        }
        Err(e) => {
            warn!(analysis_id, error = %e, "requeue failed, delivery left unacked for redelivery");
        }
    }
}

/// Writes a terminal `failed` row with code `MAX_RETRIES_EXCEEDED`, fetching
/// the current `lock_version` since callers here don't carry one forward.
async fn mark_max_retries_exceeded(ctx: &WorkerContext, analysis_id: &str, message: &str) {
    let Ok(id) = Uuid::parse_str(analysis_id) else {
        error!(analysis_id, "cannot parse analysis id to record MAX_RETRIES_EXCEEDED");
        return;
    };

    let current = match ctx.repo.find_by_id(id).await {
        Ok(Some(a)) => a,
        Ok(None) => {
            warn!(analysis_id = %id, "analysis vanished before MAX_RETRIES_EXCEEDED could be recorded");
            return;
        }
        Err(e) => {
            error!(analysis_id = %id, error = %e, "failed to load analysis for MAX_RETRIES_EXCEEDED");
            return;
        }
    };

    if current.status == AnalysisStatus::Completed || current.status == AnalysisStatus::Failed {
        return;
    }

    let detail = ErrorDetail {
        code: "MAX_RETRIES_EXCEEDED".to_string(),
        message: message.to_string(),
        status_code: None,
        details: None,
    };

    match ctx.repo.fail(id, current.lock_version, &detail).await {
        Ok(Some(_)) => {
            ctx.cache.invalidate(id).await;
            warn!(analysis_id = %id, "analysis permanently failed: retry budget exhausted");
        }
        Ok(None) => {
            warn!(analysis_id = %id, "lost lock_version race recording MAX_RETRIES_EXCEEDED");
        }
        Err(e) => {
            error!(analysis_id = %id, error = %e, "failed to persist MAX_RETRIES_EXCEEDED");
        }
    }
}

/// The actual pipeline: claim, fetch, dedupe-or-analyze, persist. Early
/// returns after a terminal write (`complete`/`fail`) return `Ok(())` so the
/// delivery is acked — the failure is already durably recorded on the row.
/// A transient fetch failure (network/timeout, or the fetcher's own circuit
/// breaker tripping) instead releases the claim and returns `Err`, so
/// `handle_delivery` requeues the message via the broker's `x-retry-count`
/// path; only once that cap is exhausted does the analysis reach a terminal
/// `MAX_RETRIES_EXCEEDED` state.
async fn process(ctx: Arc<WorkerContext>, payload: AnalysisRequestedPayload) -> anyhow::Result<()> {
    let id = payload.analysis_id;
    let started = Instant::now();

    let current = ctx
        .repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("analysis {id} vanished before claim"))?;

    if current.status != AnalysisStatus::Requested {
        info!(analysis_id = %id, status = ?current.status, "analysis not in requested state, skipping");
        return Ok(());
    }

    let claimed = match ctx
        .repo
        .transition_to_in_progress(id, current.lock_version)
        .await?
    {
        Some(a) => a,
        None => {
            info!(analysis_id = %id, "lost the claim race, another worker owns this analysis");
            return Ok(());
        }
    };

    let fetch_result = match ctx.fetcher.fetch(&payload.url).await {
        Ok(r) => r,
        Err(e) if is_transient_fetch_error(&e) => {
            if let Err(revert_err) = ctx.repo.revert_to_requested(id, claimed.lock_version).await {
                warn!(analysis_id = %id, error = %revert_err, "failed to release claim after transient fetch failure");
            }
            return Err(anyhow::anyhow!("transient fetch failure: {e}"));
        }
        Err(e) => {
            fail(&ctx, id, claimed.lock_version, &e.to_string(), "FETCH_ERROR", started).await?;
            return Ok(());
        }
    };

    let content_hash = hex::encode(Sha256::digest(fetch_result.html.as_bytes()));
    let content_size = fetch_result.html.len() as i64;

    let Some(with_hash) = ctx
        .repo
        .set_content_meta(id, claimed.lock_version, &content_hash, content_size)
        .await?
    else {
        warn!(analysis_id = %id, "lost lock_version race persisting content hash");
        return Ok(());
    };

    if let Some(sibling) = ctx
        .repo
        .find_completed_by_content_hash(&content_hash, id)
        .await?
    {
        if let Some(report) = sibling.results {
            crate::metrics::pipeline::record_deduplicated();
            return finish(&ctx, id, with_hash.lock_version, report, started).await;
        }
    }

    let base_url: Url = match fetch_result.final_url.parse() {
        Ok(u) => u,
        Err(e) => {
            fail(&ctx, id, with_hash.lock_version, &e.to_string(), "INVALID_FINAL_URL", started).await?;
            return Ok(());
        }
    };

    let html = Arc::new(fetch_result.html);
    let html_version = analyzer::extract_html_version(&html);
    let title = analyzer::extract_title(&html);

    let (headings, links, forms) =
        fan_out_subtasks(&ctx, html.clone(), base_url, &payload.options).await?;

    let report = AnalysisReport {
        html_version,
        title,
        headings,
        links,
        forms,
    };

    finish(&ctx, id, with_hash.lock_version, report, started).await
}

/// Network-level failures and an open fetcher circuit breaker are worth
/// retrying via the broker's requeue path; a rejected URL or an oversized
/// body will fail identically on every attempt, so those go straight to a
/// terminal write instead of spending the retry budget.
fn is_transient_fetch_error(err: &AppError) -> bool {
    matches!(
        err,
        AppError::UrlNotReachable(_) | AppError::CircuitBreakerOpen(_) | AppError::TimeoutExceeded(_)
    )
}

/// Runs heading-count extraction, link extraction (+ optional accessibility
/// probing), and form detection concurrently. Each subtask writes its slice
/// of the result under a shared mutex and reports completion on a bounded
/// error channel; the join barrier below waits for every subtask before the
/// merged result is returned.
async fn fan_out_subtasks(
    ctx: &WorkerContext,
    html: Arc<String>,
    base_url: Url,
    options: &AnalysisOptions,
) -> anyhow::Result<(HeadingCounts, LinkSummary, FormSummary)> {
    struct FanOutResults {
        headings: HeadingCounts,
        links: LinkSummary,
        forms: FormSummary,
    }

    let results = Arc::new(Mutex::new(FanOutResults {
        headings: HeadingCounts::default(),
        links: LinkSummary::default(),
        forms: FormSummary::default(),
    }));

    let (err_tx, mut err_rx) = mpsc::channel::<Option<String>>(3);
    let mut subtasks = JoinSet::new();

    if options.include_headings {
        let html = html.clone();
        let results = results.clone();
        let err_tx = err_tx.clone();
        subtasks.spawn(async move {
            let counts = analyzer::extract_heading_counts(&html);
            results.lock().unwrap().headings = counts;
            let _ = err_tx.send(None).await;
        });
    }

    {
        let html = html.clone();
        let base_url = base_url.clone();
        let results = results.clone();
        let err_tx = err_tx.clone();
        let link_checker = ctx.link_checker.clone();
        let check_links = options.check_links;
        subtasks.spawn(async move {
            let mut links = analyzer::extract_links(&html, &base_url);
            if check_links && !links.external_list.is_empty() {
                let inaccessible = link_checker.check(&links.external_list).await;
                analyzer::merge_inaccessible(&mut links, inaccessible);
            }
            results.lock().unwrap().links = links;
            let _ = err_tx.send(None).await;
        });
    }

    if options.detect_forms {
        let html = html.clone();
        let results = results.clone();
        let err_tx = err_tx.clone();
        subtasks.spawn(async move {
            let forms = analyzer::extract_forms(&html, &base_url);
            results.lock().unwrap().forms = forms;
            let _ = err_tx.send(None).await;
        });
    }

    drop(err_tx);

    while let Some(joined) = subtasks.join_next().await {
        joined?;
    }
    while let Some(maybe_err) = err_rx.recv().await {
        if let Some(msg) = maybe_err {
            return Err(anyhow::anyhow!(msg));
        }
    }

    let merged = Arc::try_unwrap(results)
        .map_err(|_| anyhow::anyhow!("fan-out result mutex still shared after join"))?
        .into_inner()
        .map_err(|_| anyhow::anyhow!("fan-out result mutex poisoned"))?;

    Ok((merged.headings, merged.links, merged.forms))
}

async fn finish(
    ctx: &WorkerContext,
    id: Uuid,
    lock_version: i32,
    report: AnalysisReport,
    started: Instant,
) -> anyhow::Result<()> {
    let duration_ms = started.elapsed().as_millis() as i64;
    match ctx.repo.complete(id, lock_version, &report, duration_ms).await? {
        Some(completed) => {
            ctx.cache.set(&completed).await;
            crate::metrics::pipeline::record_completed("completed", started.elapsed().as_secs_f64());
            info!(analysis_id = %id, duration_ms, "analysis completed");
            Ok(())
        }
        None => {
            warn!(analysis_id = %id, "lost lock_version race completing analysis");
            Ok(())
        }
    }
}

async fn fail(
    ctx: &WorkerContext,
    id: Uuid,
    lock_version: i32,
    message: &str,
    code: &str,
    started: Instant,
) -> anyhow::Result<()> {
    let detail = ErrorDetail {
        code: code.to_string(),
        message: message.to_string(),
        status_code: None,
        details: None,
    };

    match ctx.repo.fail(id, lock_version, &detail).await? {
        Some(failed) => {
            ctx.cache.invalidate(failed.id).await;
            crate::metrics::pipeline::record_completed("failed", started.elapsed().as_secs_f64());
            warn!(analysis_id = %id, code, message, "analysis failed");
            Ok(())
        }
        None => {
            warn!(analysis_id = %id, "lost lock_version race recording failure");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_deserializes_with_default_options() {
        let raw = serde_json::json!({
            "analysis_id": "00000000-0000-0000-0000-000000000001",
            "url": "https://example.com",
        });
        let payload: AnalysisRequestedPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(payload.url, "https://example.com");
        assert!(payload.options.include_headings);
    }

    #[test]
    fn payload_rejects_missing_url() {
        let raw = serde_json::json!({
            "analysis_id": "00000000-0000-0000-0000-000000000001",
        });
        let result: Result<AnalysisRequestedPayload, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }
}
