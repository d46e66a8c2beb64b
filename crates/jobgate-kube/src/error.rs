use jobgate_core::BackendError;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while setting up the Kubernetes client.
#[derive(Debug, Error)]
pub enum KubeError {
    /// No API URL, no kubeconfig and no in-cluster service discovery.
    #[error("kubernetes API not configured: {0}")]
    NotConfigured(String),

    /// A service-account file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A kubeconfig file was read but could not be used.
    #[error("invalid kubeconfig {path}: {message}")]
    Kubeconfig { path: String, message: String },

    /// Building the HTTP client failed (bad CA bundle, TLS backend, etc.).
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Subset of the Kubernetes `Status` object returned on API errors.
#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

/// Turn a non-2xx API answer into a [`BackendError`].
///
/// `404` maps to [`BackendError::NotFound`]; anything else becomes
/// [`BackendError::Rejected`] carrying the `Status.message` when the body
/// parses, the raw body otherwise.
pub(crate) fn rejection(status: u16, kind: &'static str, name: &str, body: &str) -> BackendError {
    if status == 404 {
        return BackendError::NotFound {
            kind,
            name: name.to_owned(),
        };
    }

    let message = match serde_json::from_str::<ApiStatus>(body) {
        Ok(s) if !s.message.is_empty() => s.message,
        Ok(s) if !s.reason.is_empty() => s.reason,
        _ if body.trim().is_empty() => format!("{kind} {name}: empty response"),
        _ => body.trim().to_owned(),
    };
    BackendError::Rejected { status, message }
}

pub(crate) fn transport(err: reqwest::Error) -> BackendError {
    if err.is_decode() {
        BackendError::Malformed(err.to_string())
    } else if err.is_timeout() {
        BackendError::Unreachable(format!("request timed out: {err}"))
    } else {
        BackendError::Unreachable(err.to_string())
    }
}
