//! Data models for the page analyzer.
//!
//! `analysis` carries the durable `Analysis` aggregate, the `AnalysisReport`
//! value nested inside it, and the transient `AnalysisEvent` pushed to SSE
//! subscribers.

pub mod analysis;

pub use analysis::{
    Analysis, AnalysisEvent, AnalysisEventType, AnalysisOptions, AnalysisReport, AnalysisStatus,
    ErrorDetail, FormSummary, HeadingCounts, HtmlVersion, InaccessibleLink, LinkSummary,
    LoginFormDetails,
};
