//! Liveness endpoint.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::method_not_allowed;
use crate::schemas::MessageResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_root), components(schemas(MessageResponse)))]
pub struct HealthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_root).fallback(method_not_allowed))
}

/// Returns `{"message": "Server is running"}`.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Server is running", body = MessageResponse),
        (status = 405, description = "Method not allowed"),
    )
)]
pub async fn get_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Server is running".to_owned(),
    })
}
