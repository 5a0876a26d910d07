//! Redis-backed caching for the analysis read path.

pub mod analysis_cache;

pub use analysis_cache::AnalysisCache;
