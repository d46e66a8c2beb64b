//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID span, upload body limit)
//! - Optional Swagger UI / OpenAPI document endpoint (disable with `JOBGATE_ENABLE_SWAGGER=false`)
//! - `GET /`, `POST /submit` and `GET /status/{job_id}`

pub mod doc;
mod health;
mod status;
mod submit;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ServerError;
use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Room for multipart boundaries and the text fields on top of the archive.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .merge(submit::router())
        .merge(status::router())
        .fallback(not_found);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    let body_limit = state.config.max_upload_bytes().saturating_add(FORM_OVERHEAD);

    app.layer(DefaultBodyLimit::max(body_limit))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

pub(crate) async fn method_not_allowed() -> ServerError {
    ServerError::MethodNotAllowed
}

async fn not_found() -> ServerError {
    ServerError::NotFound("no such route".into())
}
