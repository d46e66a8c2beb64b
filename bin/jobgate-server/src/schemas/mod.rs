//! Request and response bodies of the public API.

use bytes::Bytes;
use jobgate_core::{JobView, Submission};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `multipart/form-data` body of `POST /submit`.
#[derive(Debug, ToSchema)]
pub struct SubmitForm {
    /// Requester label, e.g. a student name.
    pub name: String,
    /// Workload label, e.g. an assignment name.
    pub image: String,
    /// Zip archive mounted into the runner.
    #[schema(value_type = String, format = Binary)]
    pub script: Bytes,
}

impl From<SubmitForm> for Submission {
    fn from(form: SubmitForm) -> Self {
        Self {
            requester: form.name,
            workload: form.image,
            artifact: form.script,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    /// Human readable hint where to poll.
    pub status: String,
    pub job_id: String,
}

impl SubmitResponse {
    pub fn accepted(job_id: &str) -> Self {
        Self {
            status: format!("Job created, please poll /status/{job_id} for results"),
            job_id: job_id.to_owned(),
        }
    }
}

/// Body of `GET /status/{job_id}`.
///
/// `results` and `error` are only present once the job is terminal.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// `pending`, `succeeded` or `failed`.
    pub status: String,
    /// Job output, decoded as UTF-8 with invalid sequences replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobView> for StatusResponse {
    fn from(view: JobView) -> Self {
        Self {
            status: view.status.as_str().to_owned(),
            results: view
                .results
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            error: view.error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use jobgate_core::{JobId, JobStatus};

    #[test]
    fn pending_view_serializes_status_only() {
        let view = JobView {
            id: JobId::from("a"),
            status: JobStatus::Pending,
            results: None,
            error: None,
        };
        let body = serde_json::to_value(StatusResponse::from(view)).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "pending" }));
    }

    #[test]
    fn results_are_decoded_lossily() {
        let view = JobView {
            id: JobId::from("a"),
            status: JobStatus::Failed,
            results: Some(Bytes::from_static(b"ok\xff")),
            error: Some("execution failed".into()),
        };
        let body = serde_json::to_value(StatusResponse::from(view)).unwrap();
        assert_eq!(body["results"], "ok\u{fffd}");
        assert_eq!(body["error"], "execution failed");
    }

    #[test]
    fn accepted_message_points_at_status_route() {
        let r = SubmitResponse::accepted("alice-hw1-1");
        assert_eq!(r.status, "Job created, please poll /status/alice-hw1-1 for results");
    }
}
