//! Database access layer: the `analyses` repository.
//!
//! Connection pooling and migrations are handled by the shared `db-pool` crate;
//! this module only holds the page-analyzer-specific repository.

pub mod analysis_repo;

pub use analysis_repo::AnalysisRepository;
