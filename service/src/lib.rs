/// Page Analyzer Service Library
///
/// Accepts URLs for asynchronous analysis (HTML version, title, heading
/// counts, link classification and accessibility, login-form detection) and
/// exposes the results over HTTP, including a server-sent-events status
/// stream. Intake, analysis and persistence are decoupled by a transactional
/// outbox publishing to a broker, with a subscriber worker doing the actual
/// fetch/analyze/persist work.
///
/// # Modules
///
/// - `handlers`: HTTP request handlers for the analyses API
/// - `services`: Application/business logic layer
/// - `models`: The `Analysis` aggregate and its nested value types
/// - `db`: Database access layer and repositories
/// - `cache`: Read-through caching for the analysis read path
/// - `fetcher`: Preflight-gated, circuit-breaker-wrapped page fetching
/// - `analyzer`: Pure HTML extraction (version, title, headings, links, forms)
/// - `linkcheck`: Bounded-concurrency link accessibility probing
/// - `worker`: The subscriber pipeline driving analysis to completion
/// - `normalize`: URL normalization and SSRF-hardening preflight checks
/// - `error`: Error types and HTTP error-response mapping
/// - `config`: Configuration management
/// - `metrics`: Observability and metrics collection
/// - `openapi`: OpenAPI document for the REST surface
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod linkcheck;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod openapi;
pub mod services;
pub mod worker;

pub use config::Config;
pub use error::{AppError, Result};
