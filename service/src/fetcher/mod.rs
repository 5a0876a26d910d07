//! Web fetcher: preflight-gated, circuit-breaker-wrapped HTTP GET of the
//! page under analysis.

use crate::error::AppError;
use crate::normalize::preflight;
use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use resilience::presets;
use resilience::retry::{with_retry, RetryConfig};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_retries: u32,
    pub retry_wait: Duration,
    pub max_retry_wait: Duration,
    pub max_redirects: usize,
    pub max_response_bytes: u64,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl From<&crate::config::FetcherConfig> for FetcherConfig {
    fn from(c: &crate::config::FetcherConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_wait: Duration::from_millis(c.retry_wait_ms),
            max_retry_wait: Duration::from_millis(c.max_retry_wait_ms),
            max_redirects: c.max_redirects,
            max_response_bytes: c.max_response_bytes,
            user_agent: c.user_agent.clone(),
            request_timeout: Duration::from_secs(c.cb_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub final_url: String,
    pub status_code: u16,
    pub html: String,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub fetch_duration: Duration,
}

/// Wraps a `reqwest::Client` with preflight validation, bounded redirects, a
/// response size cap and a circuit breaker shared across calls.
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    breaker: CircuitBreaker,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        let breaker = CircuitBreaker::new(presets::page_fetch_config().circuit_breaker);

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchResult, AppError> {
        let parsed = preflight(url).map_err(AppError::InvalidUrl)?;

        let retry_config = RetryConfig {
            max_retries: self.config.max_retries,
            initial_backoff: self.config.retry_wait,
            max_backoff: self.config.max_retry_wait,
            backoff_multiplier: 2.0,
            jitter: true,
        };

        let client = self.client.clone();
        let max_bytes = self.config.max_response_bytes;
        let url_for_call = parsed.clone();

        let outcome = self
            .breaker
            .call(|| async {
                let response = with_retry(retry_config, || {
                    let client = client.clone();
                    let url = url_for_call.clone();
                    async move { client.get(url.as_str()).send().await.map_err(|e| e.to_string()) }
                })
                .await
                .map_err(|e| e.to_string())?;

                read_response(response, max_bytes).await
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(CircuitBreakerError::Open) => {
                warn!(url = %parsed, "fetcher circuit breaker open");
                Err(AppError::CircuitBreakerOpen(
                    "fetcher circuit breaker open".to_string(),
                ))
            }
            Err(CircuitBreakerError::CallFailed(msg)) => Err(classify_failure(msg)),
        }
    }
}

fn classify_failure(msg: String) -> AppError {
    if msg.contains("RESPONSE_TOO_LARGE") {
        AppError::ResponseTooLarge(msg)
    } else {
        AppError::UrlNotReachable(msg)
    }
}

async fn read_response(response: reqwest::Response, max_bytes: u64) -> Result<FetchResult, String> {
    let started = Instant::now();

    let status = response.status();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect::<HashMap<_, _>>();

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(format!(
                "RESPONSE_TOO_LARGE: content-length {len} exceeds cap {max_bytes}"
            ));
        }
    }

    let body = read_bounded_body(response, max_bytes).await?;

    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(format!("non-2xx status {}: {}", status.as_u16(), snippet));
    }

    debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "fetched page");

    Ok(FetchResult {
        final_url,
        status_code: status.as_u16(),
        html: body,
        content_type,
        headers,
        fetch_duration: started.elapsed(),
    })
}

async fn read_bounded_body(response: reqwest::Response, max_bytes: u64) -> Result<String, String> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(format!(
                "RESPONSE_TOO_LARGE: body exceeded cap of {max_bytes} bytes"
            ));
        }
    }

    Ok(String::from_utf8_lossy(&buf).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            max_retries: 0,
            retry_wait: Duration::from_millis(1),
            max_retry_wait: Duration::from_millis(10),
            max_redirects: 10,
            max_response_bytes: 10 * 1024 * 1024,
            user_agent: "page-analyzer-test/1.0".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn rejects_blocked_host_before_any_network_call() {
        let fetcher = Fetcher::new(test_config()).unwrap();
        let result = fetcher.fetch("http://localhost/anything").await;
        assert!(matches!(result, Err(AppError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let fetcher = Fetcher::new(test_config()).unwrap();
        let result = fetcher.fetch("ftp://example.com/file").await;
        assert!(matches!(result, Err(AppError::InvalidUrl(_))));
    }
}
