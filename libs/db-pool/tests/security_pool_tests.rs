//! Security tests for database connection pool
//!
//! OWASP A04:2021 - Insecure Design (Resource Exhaustion)

#[allow(unused_imports)]
use db_pool::{create_pool, DbConfig};

fn test_config(service_name: &str) -> DbConfig {
    DbConfig {
        service_name: service_name.to_string(),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/page_analyzer_test".to_string()),
        ..DbConfig::default()
    }
}

// =============================================================================
// Connection Timeout Tests
// =============================================================================

#[test]
fn test_pool_has_acquire_timeout() {
    let config = test_config("page-analyzer");

    assert!(
        config.acquire_timeout_secs > 0,
        "Acquire timeout must be configured to prevent indefinite hangs"
    );

    assert!(
        config.acquire_timeout_secs <= 30,
        "Acquire timeout too long ({}s), should be \u{2264}30s",
        config.acquire_timeout_secs
    );
}

#[test]
fn test_pool_has_idle_timeout() {
    let config = test_config("page-analyzer");

    assert!(
        config.idle_timeout_secs > 0,
        "Idle timeout must be configured to prevent stale connections"
    );

    assert!(
        config.idle_timeout_secs >= 300,
        "Idle timeout too short ({}s), should be \u{2265}300s to avoid thrashing",
        config.idle_timeout_secs
    );
}

#[test]
fn test_pool_has_max_lifetime() {
    let config = test_config("page-analyzer");

    assert!(
        config.max_lifetime_secs > 0,
        "Max lifetime must be configured to handle PostgreSQL restarts"
    );

    assert!(
        config.max_lifetime_secs >= config.idle_timeout_secs,
        "Max lifetime ({}s) should be \u{2265} idle timeout ({}s)",
        config.max_lifetime_secs,
        config.idle_timeout_secs
    );
}

#[test]
fn test_pool_config_min_less_than_max() {
    let config = test_config("page-analyzer");

    assert!(
        config.min_connections < config.max_connections,
        "min_connections ({}) must be < max_connections ({})",
        config.min_connections,
        config.max_connections
    );
}

#[test]
fn test_pool_config_rejects_zero_connections() {
    let config = test_config("page-analyzer");

    assert!(
        config.max_connections > 0,
        "Pool with zero connections is invalid"
    );
}

// =============================================================================
// Connection String Security Tests
// =============================================================================

#[test]
fn test_database_url_not_logged() {
    // Verify DATABASE_URL is never accidentally present in Debug output
    let config = test_config("page-analyzer");

    let log_output = format!("{:?}", config);

    assert!(
        !log_output.contains("postgres://"),
        "DATABASE_URL leaked in debug output: {}",
        log_output
    );
}

// =============================================================================
// Service Name Handling Tests
// =============================================================================

#[test]
fn test_service_name_stored_as_is() {
    // Arbitrary service names must not cause panics or be rewritten.
    let names = vec![
        "page-analyzer",
        "../../../etc/passwd",
        "'; DROP TABLE analyses--",
        "<script>alert('xss')</script>",
        "page-analyzer\n\nevil-command",
    ];

    for name in names {
        let config = test_config(name);
        assert_eq!(config.service_name, name);
    }
}

// =============================================================================
// Pool Creation Failure Handling Tests
// =============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_pool_creation_fails_with_invalid_url() {
    let mut config = test_config("page-analyzer");
    config.database_url = "invalid://not-a-database".to_string();

    let result = create_pool(config).await;

    assert!(
        result.is_err(),
        "Pool creation should fail with invalid DATABASE_URL"
    );
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_pool_creation_timeout_enforced() {
    let mut config = test_config("page-analyzer");
    config.database_url = "postgres://127.0.0.1:9999/nonexistent".to_string();
    config.connect_timeout_secs = 1;

    let start = std::time::Instant::now();
    let result = create_pool(config).await;
    let elapsed = start.elapsed();

    assert!(
        result.is_err(),
        "Pool creation should fail for unreachable DB"
    );

    assert!(
        elapsed.as_secs() < 5,
        "Pool creation timeout not enforced (took {}s)",
        elapsed.as_secs()
    );
}

// =============================================================================
// Metrics Export Security Tests
// =============================================================================

#[test]
fn test_pool_metrics_do_not_expose_credentials() {
    let config = test_config("page-analyzer");
    config.log_config();

    let metrics = prometheus::default_registry().gather();

    for metric_family in metrics {
        for metric in metric_family.get_metric() {
            for label in metric.get_label() {
                let value = label.get_value();

                assert!(
                    !value.contains("password"),
                    "Metric label contains 'password': {}",
                    value
                );
                assert!(
                    !value.contains("postgres://"),
                    "Metric label contains connection string: {}",
                    value
                );
            }
        }
    }
}
