//! HTTP handlers for the Job Status façade. Mirrors the
//! request/response shape of this codebase's `webhook.rs`: a thin decode,
//! a façade call, and an error mapped to the narrowest correct status code.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use job_common::{JobId, ListFilter};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::facade::{FacadeError, JobStatusFacade, JobStatusView};

pub use crate::facade::PDF_QUEUE_NAME;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    let message = message.into();
    error!(status = %status, message, "job-api request failed");
    (status, Json(ErrorResponse { error: message }))
}

impl FacadeError {
    fn status(&self) -> StatusCode {
        match self {
            FacadeError::CalendarNotFound | FacadeError::JobNotFound => StatusCode::NOT_FOUND,
            FacadeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FacadeError::Queue(_) | FacadeError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn facade_error(error: FacadeError) -> (StatusCode, Json<ErrorResponse>) {
    error_response(error.status(), error.to_string())
}

#[derive(Debug, Deserialize)]
pub struct EnqueuePdfRequest {
    pub calendar_id: String,
    #[serde(default)]
    pub watermark: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

pub async fn enqueue_pdf_generation(
    State(facade): State<Arc<JobStatusFacade>>,
    Json(request): Json<EnqueuePdfRequest>,
) -> Result<Json<EnqueueResponse>, (StatusCode, Json<ErrorResponse>)> {
    let job_id = facade
        .enqueue_pdf_generation(&request.calendar_id, request.watermark, request.user_id)
        .await
        .map_err(facade_error)?;

    Ok(Json(EnqueueResponse { job_id }))
}

pub async fn get_job_status(
    State(facade): State<Arc<JobStatusFacade>>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobStatusView>, (StatusCode, Json<ErrorResponse>)> {
    let status = facade.get_job_status(job_id).await.map_err(facade_error)?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListJobsQuery {
    pub queue_name: Option<String>,
    pub status: Option<job_common::JobStatus>,
    pub actor_id: Option<String>,
    pub created_after: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
}

const DEFAULT_LIST_LIMIT: i64 = 100;

/// Admin-only; authorization is enforced upstream of this service,
/// which does not own session/OIDC concerns.
pub async fn list_jobs(
    State(facade): State<Arc<JobStatusFacade>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<job_common::JobRow>>, (StatusCode, Json<ErrorResponse>)> {
    let filter = ListFilter {
        queue_name: query.queue_name,
        status: query.status,
        actor_id: query.actor_id,
        created_after: query.created_after,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    let rows = facade.list_jobs(filter, limit).await.map_err(facade_error)?;
    Ok(Json(rows))
}

/// Admin-only.
pub async fn retry_failed(
    State(facade): State<Arc<JobStatusFacade>>,
    Path(job_id): Path<JobId>,
) -> Result<Json<EnqueueResponse>, (StatusCode, Json<ErrorResponse>)> {
    let new_id = facade.retry_failed(job_id).await.map_err(facade_error)?;
    Ok(Json(EnqueueResponse { job_id: new_id }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    cancelled: bool,
}

pub async fn cancel_pending(
    State(facade): State<Arc<JobStatusFacade>>,
    Path(job_id): Path<JobId>,
) -> Result<Json<CancelResponse>, (StatusCode, Json<ErrorResponse>)> {
    let cancelled = facade.cancel_pending(job_id).await.map_err(facade_error)?;
    Ok(Json(CancelResponse { cancelled }))
}
