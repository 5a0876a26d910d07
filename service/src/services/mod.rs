//! Application service layer: the HTTP surface's entry point into the
//! repository/cache/outbox layers.

pub mod analysis_service;

pub use analysis_service::AnalysisService;
