//! HTTP handlers for the page-analyzer API surface.
//!
//! Three routes: submit a URL for analysis, read back the current state, and
//! subscribe to a server-sent-events stream of state transitions.

use actix_web::{web, web::Bytes, HttpResponse};
use futures::stream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Analysis, AnalysisOptions};
use crate::services::AnalysisService;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAnalysisRequest {
    pub url: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateAnalysisResponse {
    pub id: Uuid,
    pub status: &'static str,
}

/// Submit a URL for asynchronous analysis.
#[utoipa::path(
    post,
    path = "/v1/analyses",
    tag = "analyses",
    request_body = CreateAnalysisRequest,
    responses(
        (status = 202, description = "Analysis accepted", body = CreateAnalysisResponse),
        (status = 400, description = "URL failed validation"),
        (status = 500, description = "Intake failed")
    )
)]
pub async fn create_analysis(
    service: web::Data<AnalysisService>,
    payload: web::Json<CreateAnalysisRequest>,
) -> Result<HttpResponse, AppError> {
    let analysis = service
        .start_analysis(&payload.url, payload.options.clone())
        .await?;

    Ok(HttpResponse::Accepted().json(CreateAnalysisResponse {
        id: analysis.id,
        status: "requested",
    }))
}

/// Fetch the current state of an analysis by id.
#[utoipa::path(
    get,
    path = "/v1/analyses/{id}",
    tag = "analyses",
    params(("id" = Uuid, Path, description = "Analysis id")),
    responses(
        (status = 200, description = "Analysis found", body = Analysis),
        (status = 404, description = "No analysis with this id")
    )
)]
pub async fn get_analysis(
    service: web::Data<AnalysisService>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let analysis = service.fetch_analysis(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(analysis))
}

/// Subscribe to a server-sent-events stream of state transitions for an
/// analysis. The stream ends on terminal state, on the poller giving up, or
/// when the client disconnects (actix-web drops this future).
#[utoipa::path(
    get,
    path = "/v1/analyses/{id}/events",
    tag = "analyses",
    params(("id" = Uuid, Path, description = "Analysis id")),
    responses((status = 200, description = "text/event-stream of AnalysisEvent frames"))
)]
pub async fn stream_analysis_events(
    service: web::Data<AnalysisService>,
    id: web::Path<Uuid>,
) -> HttpResponse {
    let rx = service.fetch_analysis_events(id.into_inner());

    let body = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());
        let frame = format!("event: analysis\ndata: {json}\n\n");
        Some((Ok::<_, actix_web::Error>(Bytes::from(frame)), rx))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}
