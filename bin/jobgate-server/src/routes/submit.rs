//! Job submission (`multipart/form-data`).

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use jobgate_core::Submission;
use tracing::{debug, info};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::routes::method_not_allowed;
use crate::schemas::{SubmitForm, SubmitResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(submit), components(schemas(SubmitForm, SubmitResponse)))]
pub struct SubmitApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/submit", post(submit).fallback(method_not_allowed))
}

/// Stage a zip archive and schedule it on the cluster.
///
/// Returns `202` as soon as the job is created; poll `GET /status/{job_id}`
/// for the outcome.
#[utoipa::path(
    post,
    path = "/submit",
    tag = "jobs",
    request_body(content = SubmitForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job created", body = SubmitResponse),
        (status = 400, description = "Missing field or malformed form"),
        (status = 405, description = "Method not allowed"),
        (status = 413, description = "Archive exceeds the upload limit"),
        (status = 500, description = "Backend failure while creating the job"),
    )
)]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ServerError> {
    let mut multipart = multipart
        .map_err(|e| ServerError::BadRequest(format!("expected multipart/form-data: {e}")))?;
    let limit = state.config.max_upload_bytes();

    let mut name = None;
    let mut image = None;
    let mut script: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => name = Some(field.text().await.map_err(form_error)?),
            Some("image") => image = Some(field.text().await.map_err(form_error)?),
            Some("script") => {
                let data = field.bytes().await.map_err(form_error)?;
                if data.len() > limit {
                    return Err(ServerError::PayloadTooLarge(format!(
                        "script archive is {} bytes, limit is {}MB",
                        data.len(),
                        state.config.max_upload_mb
                    )));
                }
                script = Some(data);
            }
            other => debug!(field = ?other, "ignoring unknown form field"),
        }
    }

    let form = SubmitForm {
        name: name.ok_or_else(|| ServerError::BadRequest("missing 'name' field".into()))?,
        image: image.ok_or_else(|| ServerError::BadRequest("missing 'image' field".into()))?,
        script: script.ok_or_else(|| ServerError::BadRequest("missing 'script' file".into()))?,
    };

    let accepted = state.gateway.submit(Submission::from(form)).await?;

    info!(job_id = %accepted.job_id, "job created");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse::accepted(accepted.job_id.as_str())),
    ))
}

fn form_error(e: MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(e.body_text())
    } else {
        ServerError::BadRequest(format!("failed to parse form: {}", e.body_text()))
    }
}
