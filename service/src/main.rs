use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use analyzer_service::cache::AnalysisCache;
use analyzer_service::db::AnalysisRepository;
use analyzer_service::fetcher::{Fetcher, FetcherConfig as DomainFetcherConfig};
use analyzer_service::handlers;
use analyzer_service::linkcheck::{LinkChecker, LinkCheckerConfig as DomainLinkCheckerConfig};
use analyzer_service::metrics::serve_metrics;
use analyzer_service::openapi::ApiDoc;
use analyzer_service::services::AnalysisService;
use analyzer_service::worker::{handle_delivery, WorkerContext};
use chrono::Utc;
use db_pool::{create_pool as create_pg_pool, migrate as migrate_db, DbConfig as DbPoolConfig};
use redis::aio::ConnectionManager;
use redis::RedisError;
use redis_utils::RedisPool;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::{OutboxMetrics, OutboxProcessor, OutboxProcessorConfig, SqlxOutboxRepository};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

struct HealthState {
    db_pool: sqlx::Pool<sqlx::Postgres>,
    redis_manager: Arc<Mutex<ConnectionManager>>,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Serialize)]
struct ComponentCheck {
    status: ComponentStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    status: ComponentStatus,
    checks: HashMap<String, ComponentCheck>,
    timestamp: String,
}

impl HealthState {
    fn new(db_pool: sqlx::Pool<sqlx::Postgres>, redis_manager: Arc<Mutex<ConnectionManager>>) -> Self {
        Self {
            db_pool,
            redis_manager,
        }
    }

    async fn check_postgres(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.db_pool)
            .await
            .map(|_| ())
    }

    async fn check_redis(&self) -> Result<(), RedisError> {
        let mut conn = self.redis_manager.lock().await;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(RedisError::from((
                redis::ErrorKind::ResponseError,
                "unexpected PING response",
            )))
        }
    }
}

async fn health_summary(state: web::Data<HealthState>) -> HttpResponse {
    match state.check_postgres().await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "page-analyzer",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "error": format!("PostgreSQL connection failed: {}", e),
            "service": "page-analyzer"
        })),
    }
}

async fn readiness_summary(state: web::Data<HealthState>) -> HttpResponse {
    let mut checks = HashMap::new();
    let mut ready = true;

    let start = Instant::now();
    let pg_result = state.check_postgres().await;
    let pg_latency = Some(start.elapsed().as_millis() as u64);
    let postgres_check = match pg_result {
        Ok(_) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: "PostgreSQL connection successful".to_string(),
            latency_ms: pg_latency,
        },
        Err(e) => {
            ready = false;
            ComponentCheck {
                status: ComponentStatus::Unhealthy,
                message: format!("PostgreSQL connection failed: {}", e),
                latency_ms: pg_latency,
            }
        }
    };
    checks.insert("postgresql".to_string(), postgres_check);

    let start = Instant::now();
    let redis_result = state.check_redis().await;
    let redis_latency = Some(start.elapsed().as_millis() as u64);
    let redis_check = match redis_result {
        Ok(_) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: "Redis ping successful".to_string(),
            latency_ms: redis_latency,
        },
        Err(e) => {
            ready = false;
            ComponentCheck {
                status: ComponentStatus::Unhealthy,
                message: format!("Redis ping failed: {}", e),
                latency_ms: redis_latency,
            }
        }
    };
    checks.insert("redis".to_string(), redis_check);

    let status = if ready {
        ComponentStatus::Healthy
    } else {
        ComponentStatus::Unhealthy
    };

    let response = ReadinessResponse {
        ready,
        status,
        checks,
        timestamp: Utc::now().to_rfc3339(),
    };

    if ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}

async fn openapi_json(doc: web::Data<utoipa::openapi::OpenApi>) -> actix_web::Result<HttpResponse> {
    let body = serde_json::to_string(&*doc).map_err(|e| {
        tracing::error!("OpenAPI serialization failed: {}", e);
        actix_web::error::ErrorInternalServerError("OpenAPI serialization error")
    })?;

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

/// Page Analyzer Service
///
/// Accepts URLs for asynchronous analysis and exposes the result over HTTP,
/// including a server-sent-events status stream. Each process runs three
/// independent actors sharing one database and broker connection: the HTTP
/// intake/read path, the outbox publisher tick loop, and the subscriber
/// consume loop that does the actual fetch/analyze/persist work.
#[actix_web::main]
async fn main() -> io::Result<()> {
    // Support container healthchecks via CLI subcommand: `healthcheck-http` or legacy `healthcheck`
    {
        let mut args = std::env::args();
        let _bin = args.next();
        if let Some(cmd) = args.next() {
            if cmd == "healthcheck" || cmd == "healthcheck-http" {
                let url = "http://127.0.0.1:8080/v1/health";
                match reqwest::Client::new().get(url).send().await {
                    Ok(resp) if resp.status().is_success() => return Ok(()),
                    Ok(resp) => {
                        eprintln!("healthcheck HTTP status: {}", resp.status());
                        return Err(io::Error::new(io::ErrorKind::Other, "healthcheck failed"));
                    }
                    Err(e) => {
                        eprintln!("healthcheck HTTP error: {}", e);
                        return Err(io::Error::new(io::ErrorKind::Other, "healthcheck error"));
                    }
                }
            }
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match analyzer_service::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting page-analyzer v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);

    let db_cfg = DbPoolConfig {
        service_name: "page-analyzer".to_string(),
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        acquire_timeout_secs: config.database.acquire_timeout_secs,
        ..DbPoolConfig::default()
    };
    db_cfg.log_config();

    let db_pool = match create_pg_pool(db_cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {}", e);
            eprintln!("ERROR: Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = migrate_db(&db_pool, "./migrations").await {
        tracing::error!("Database migration failed: {}", e);
        eprintln!("ERROR: Failed to run database migrations: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Connected to database via db-pool crate");

    let http_bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {}", http_bind_address);

    let redis_pool = RedisPool::connect(&config.cache.url, None).await.map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to initialize Redis connection: {e}"),
        )
    })?;

    let cache = Arc::new(AnalysisCache::new(redis_pool.manager(), Duration::from_secs(300)));

    let fetcher = Arc::new(
        Fetcher::new(DomainFetcherConfig::from(&config.fetcher)).map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("Failed to build fetcher: {e}"))
        })?,
    );

    let link_checker = Arc::new(
        LinkChecker::new(DomainLinkCheckerConfig::from(&config.link_checker)).map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to build link checker: {e}"),
            )
        })?,
    );

    let analysis_service = Arc::new(AnalysisService::new(
        db_pool.clone(),
        cache.clone(),
        Duration::from_millis(config.sse.events_interval_ms),
        config.outbox.max_retries_normal,
    ));

    let broker = Arc::new(
        broker::Broker::connect(config.broker.to_broker_config())
            .await
            .map_err(|e| {
                io::Error::new(io::ErrorKind::Other, format!("Failed to connect to broker: {e}"))
            })?,
    );

    let outbox_repo = Arc::new(SqlxOutboxRepository::new(db_pool.clone()));
    let outbox_metrics = OutboxMetrics::new("page-analyzer");
    let outbox_processor = Arc::new(OutboxProcessor::new(
        outbox_repo,
        broker.clone(),
        outbox_metrics,
        OutboxProcessorConfig {
            tick_interval: Duration::from_secs(config.outbox.tick_interval_secs),
            batch_size: config.outbox.batch_size,
            publish_timeout: Duration::from_secs(3),
            backoff: config.backoff.to_outbox_backoff(),
        },
    ));

    let idempotency = Arc::new(idempotent_consumer::IdempotencyGuard::new(
        db_pool.clone(),
        Duration::from_secs(config.idempotency.retention_secs),
    ));
    let worker_ctx_idempotency = idempotency.clone();

    let worker_ctx = Arc::new(WorkerContext {
        repo: AnalysisRepository::new(db_pool.clone()),
        cache: cache.clone(),
        fetcher,
        link_checker,
        idempotency,
    });

    let health_state = web::Data::new(HealthState::new(db_pool.clone(), redis_pool.manager()));
    let analysis_service_data = web::Data::from(analysis_service.clone());

    let server = HttpServer::new(move || {
        let mut cors = Cors::default();
        for origin in config.cors.allowed_origins.split(',') {
            let origin = origin.trim();
            if origin == "*" {
                cors = cors.allow_any_origin();
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header().max_age(3600);

        let openapi_doc = ApiDoc::openapi();

        App::new()
            .app_data(web::Data::new(openapi_doc.clone()))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/v1/openapi.json", openapi_doc.clone()),
            )
            .route("/v1/openapi.json", web::get().to(openapi_json))
            .app_data(analysis_service_data.clone())
            .app_data(health_state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/metrics", web::get().to(serve_metrics))
            .route("/v1/health", web::get().to(health_summary))
            .route("/v1/health/ready", web::get().to(readiness_summary))
            .route("/v1/health/live", web::get().to(liveness_check))
            .service(
                web::scope("/v1/analyses")
                    .route("", web::post().to(handlers::create_analysis))
                    .service(
                        web::resource("/{id}").route(web::get().to(handlers::get_analysis)),
                    )
                    .route(
                        "/{id}/events",
                        web::get().to(handlers::stream_analysis_events),
                    ),
            )
    })
    .bind(&http_bind_address)?
    .workers(4)
    .run();

    let server_handle = server.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();

    tasks.spawn(async move {
        tracing::info!("HTTP server is running");
        server.await
    });

    let outbox_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        tracing::info!("outbox publisher is running");
        outbox_processor.run(outbox_shutdown).await;
        Ok(())
    });

    let consumer_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        tracing::info!("subscriber is running");
        broker
            .consume("page-analyzer-worker", consumer_shutdown, move |delivery| {
                let ctx = worker_ctx.clone();
                async move { handle_delivery(ctx, delivery).await }
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    });

    let idempotency_cleanup = worker_ctx_idempotency.clone();
    let mut cleanup_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        tracing::info!("idempotency cleanup sweep is running");
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = cleanup_shutdown.changed() => return Ok(()),
                _ = interval.tick() => {
                    match idempotency_cleanup.cleanup_old_events().await {
                        Ok(removed) => tracing::info!(removed, "swept stale processed_events rows"),
                        Err(e) => tracing::warn!(error = %e, "processed_events cleanup sweep failed"),
                    }
                }
            }
        }
    });

    let mut first_error: Option<io::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("task returned error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("task join error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(());
                server_handle.stop(true).await;
                tasks.shutdown().await;
                break;
            }
        }
    }

    tracing::info!("page-analyzer shutting down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
