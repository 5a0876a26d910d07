//! Bounded-concurrency accessibility probing of a page's external links.

use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use resilience::retry::{with_retry, RetryConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::models::InaccessibleLink;

#[derive(Debug, Clone)]
pub struct LinkCheckerConfig {
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub max_links: usize,
    pub retries: u32,
    pub retry_wait: Duration,
    pub max_retry_wait: Duration,
    pub cb_failure_threshold: u32,
    pub cb_timeout: Duration,
}

impl From<&crate::config::LinkCheckerConfig> for LinkCheckerConfig {
    fn from(c: &crate::config::LinkCheckerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(c.timeout_secs),
            max_concurrent: c.max_concurrent,
            max_links: c.max_links,
            retries: c.retries,
            retry_wait: Duration::from_millis(c.retry_wait_ms),
            max_retry_wait: Duration::from_millis(c.max_retry_wait_ms),
            cb_failure_threshold: c.cb_failure_threshold,
            cb_timeout: Duration::from_secs(c.cb_timeout_secs),
        }
    }
}

/// Probes external links with a HEAD request each, fronted by a shared semaphore
/// and a single process-wide circuit breaker gated on network/timeout failures
/// only (a non-2xx/3xx status never trips it).
pub struct LinkChecker {
    client: reqwest::Client,
    config: LinkCheckerConfig,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
}

impl LinkChecker {
    pub fn new(config: LinkCheckerConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| e.to_string())?;

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.cb_failure_threshold,
            success_threshold: 2,
            timeout: config.cb_timeout,
            error_rate_threshold: 1.1, // never trip on rate, only on consecutive count
            window_size: config.cb_failure_threshold as usize,
            min_requests: config.cb_failure_threshold as usize,
        });

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            breaker,
            config,
        })
    }

    /// Filters to external, parseable, deduplicated links, truncates to
    /// `max_links`, and probes each concurrently, preserving input order.
    pub async fn check(&self, external_links: &[String]) -> Vec<InaccessibleLink> {
        let mut seen = HashSet::new();
        let candidates: Vec<String> = external_links
            .iter()
            .filter(|link| Url::parse(link).is_ok())
            .filter(|link| seen.insert((*link).clone()))
            .take(self.config.max_links)
            .cloned()
            .collect();

        let mut handles = Vec::with_capacity(candidates.len());
        for link in candidates {
            let semaphore = self.semaphore.clone();
            let client = self.client.clone();
            let breaker = self.breaker.clone();
            let retry_config = RetryConfig {
                max_retries: self.config.retries,
                initial_backoff: self.config.retry_wait,
                max_backoff: self.config.max_retry_wait,
                backoff_multiplier: 2.0,
                jitter: true,
            };

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                probe_one(&client, &breaker, retry_config, link).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Some(link)) => results.push(link),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "link probe task panicked"),
            }
        }

        results
    }
}

/// `None` means the link was reachable (2xx/3xx); `Some` carries the inaccessible record.
async fn probe_one(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    retry_config: RetryConfig,
    url: String,
) -> Option<InaccessibleLink> {
    let outcome = breaker
        .call(|| {
            let client = client.clone();
            let url = url.clone();
            async move {
                with_retry(retry_config, || {
                    let client = client.clone();
                    let url = url.clone();
                    async move { client.head(&url).send().await.map_err(|e| e.to_string()) }
                })
                .await
                .map_err(|e| e.to_string())
            }
        })
        .await;

    match outcome {
        Ok(response) => {
            let status = response.status();
            if status.is_success() || status.is_redirection() {
                debug!(url, status = status.as_u16(), "link accessible");
                None
            } else {
                Some(InaccessibleLink {
                    url,
                    status_code: status.as_u16(),
                    error: None,
                })
            }
        }
        Err(CircuitBreakerError::Open) => Some(InaccessibleLink {
            url,
            status_code: 503,
            error: Some("circuit breaker open".to_string()),
        }),
        Err(CircuitBreakerError::CallFailed(msg)) => Some(InaccessibleLink {
            url,
            status_code: 0,
            error: Some(msg),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LinkCheckerConfig {
        LinkCheckerConfig {
            timeout: Duration::from_secs(1),
            max_concurrent: 2,
            max_links: 3,
            retries: 0,
            retry_wait: Duration::from_millis(1),
            max_retry_wait: Duration::from_millis(5),
            cb_failure_threshold: 5,
            cb_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn drops_unparsable_urls() {
        let checker = LinkChecker::new(test_config()).unwrap();
        let results = checker.check(&["not a url".to_string()]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_max_links() {
        let checker = LinkChecker::new(test_config()).unwrap();
        let links: Vec<String> = (0..10)
            .map(|i| format!("http://10.255.255.{i}/"))
            .collect();
        let results = checker.check(&links).await;
        assert!(results.len() <= 3);
    }
}
