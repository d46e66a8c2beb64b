use utoipa::OpenApi;

use crate::routes::{health, status, submit};

#[derive(OpenApi)]
#[openapi(info(
    title = "jobgate-server",
    description = "Asynchronous job submission gateway for Kubernetes",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(submit::SubmitApi::openapi());
    root.merge(status::StatusApi::openapi());
    root
}
