//! Job status polling.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use jobgate_core::JobId;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::routes::method_not_allowed;
use crate::schemas::StatusResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_status), components(schemas(StatusResponse)))]
pub struct StatusApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/status/{job_id}",
            get(get_status).fallback(method_not_allowed),
        )
        .route("/status/", get(missing_job_id).fallback(method_not_allowed))
}

async fn missing_job_id() -> ServerError {
    ServerError::BadRequest("missing job id in URL path".into())
}

/// Current state of a job.
///
/// Reads the store only; it never waits for the job to finish.
#[utoipa::path(
    get,
    path = "/status/{job_id}",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Id returned by POST /submit")),
    responses(
        (status = 200, description = "Job found", body = StatusResponse),
        (status = 404, description = "Unknown job id"),
        (status = 405, description = "Method not allowed"),
    )
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ServerError> {
    let view = state.gateway.status(&JobId::from(job_id)).await?;
    debug!(job_id = %view.id, status = view.status.as_str(), "status query");
    Ok(Json(view.into()))
}
