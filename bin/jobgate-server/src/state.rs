//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use jobgate_core::Gateway;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Submission gateway; owns the job store and the monitor registry.
    pub gateway: Arc<Gateway>,
}
