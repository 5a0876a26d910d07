use utoipa::OpenApi;

use crate::handlers::{CreateAnalysisRequest, CreateAnalysisResponse};
use crate::models::{
    Analysis, AnalysisOptions, AnalysisReport, AnalysisStatus, ErrorDetail, FormSummary,
    HeadingCounts, HtmlVersion, InaccessibleLink, LinkSummary, LoginFormDetails,
};

/// OpenAPI document covering the page analyzer's REST surface.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::create_analysis,
        crate::handlers::get_analysis,
        crate::handlers::stream_analysis_events,
    ),
    components(schemas(
        CreateAnalysisRequest,
        CreateAnalysisResponse,
        Analysis,
        AnalysisStatus,
        AnalysisOptions,
        AnalysisReport,
        HtmlVersion,
        HeadingCounts,
        LinkSummary,
        InaccessibleLink,
        FormSummary,
        LoginFormDetails,
        ErrorDetail,
    )),
    tags(
        (name = "analyses", description = "Page analysis intake, read-back, and event stream")
    )
)]
pub struct ApiDoc;
