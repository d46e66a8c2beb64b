//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use jobgate_core::MonitorConfig;
use jobgate_kube::JobTemplate;
use tracing::warn;

/// Runtime configuration for jobgate-server.
///
/// Every field has a default so the server starts without any environment
/// variables set (Kubernetes discovery is configured separately, see
/// [`jobgate_kube::KubeConfig::from_env`]).
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for a daily-rolling JSON log file, in addition to stdout.
    pub log_dir: Option<String>,

    /// Largest accepted `script` archive, in MiB.
    pub max_upload_mb: usize,

    /// Delay between two status queries of the same job.
    pub poll_interval_ms: u64,

    /// Multiplier applied to the delay after every query; `1.0` keeps it fixed.
    pub poll_backoff: f64,

    /// Upper bound for the delay when backoff is enabled.
    pub poll_max_interval_ms: u64,

    /// Give up on a job after this many seconds; `0` waits forever.
    pub job_timeout_secs: u64,

    /// JSON file accumulating batch latency across jobs.
    pub latency_file: Option<String>,

    /// Serve Swagger UI at `/swagger-ui`.
    pub enable_swagger: bool,

    /// Comma-separated list of allowed CORS origins; `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Cancel running monitors on shutdown instead of leaving them to the
    /// process exit.
    pub cancel_on_shutdown: bool,

    /// How long shutdown waits for cancelled monitors to finish cleanup.
    pub shutdown_grace_secs: u64,

    /// Container image of the runner.
    pub runner_image: String,

    /// Shell script executed by the runner; `None` keeps the built-in one.
    pub runner_script: Option<String>,

    /// `ttlSecondsAfterFinished` of created Jobs.
    pub job_ttl_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            max_upload_mb: 10,
            poll_interval_ms: 2_000,
            poll_backoff: 1.0,
            poll_max_interval_ms: 2_000,
            job_timeout_secs: 0,
            latency_file: None,
            enable_swagger: true,
            cors_allowed_origins: None,
            cancel_on_shutdown: false,
            shutdown_grace_secs: 30,
            runner_image: jobgate_kube::DEFAULT_IMAGE.to_owned(),
            runner_script: None,
            job_ttl_secs: 120,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        let poll_interval_ms = parse_env("JOBGATE_POLL_INTERVAL_MS", d.poll_interval_ms);
        Self {
            bind_address: env_or("JOBGATE_BIND", &d.bind_address),
            log_level: env_or("JOBGATE_LOG", &d.log_level),
            log_json: flag("JOBGATE_LOG_JSON", d.log_json),
            log_dir: env_opt("JOBGATE_LOG_DIR"),
            max_upload_mb: parse_env("JOBGATE_MAX_UPLOAD_MB", d.max_upload_mb),
            poll_interval_ms,
            poll_backoff: parse_env("JOBGATE_POLL_BACKOFF", d.poll_backoff),
            // Without backoff the ceiling is irrelevant; default it to the base delay.
            poll_max_interval_ms: parse_env("JOBGATE_POLL_MAX_INTERVAL_MS", poll_interval_ms),
            job_timeout_secs: parse_env("JOBGATE_JOB_TIMEOUT_SECS", d.job_timeout_secs),
            latency_file: env_opt("JOBGATE_LATENCY_FILE"),
            enable_swagger: flag("JOBGATE_ENABLE_SWAGGER", d.enable_swagger),
            cors_allowed_origins: env_opt("JOBGATE_CORS_ORIGINS"),
            cancel_on_shutdown: flag("JOBGATE_CANCEL_ON_SHUTDOWN", d.cancel_on_shutdown),
            shutdown_grace_secs: parse_env("JOBGATE_SHUTDOWN_GRACE_SECS", d.shutdown_grace_secs),
            runner_image: env_or("JOBGATE_RUNNER_IMAGE", &d.runner_image),
            runner_script: env_opt("JOBGATE_RUNNER_SCRIPT"),
            job_ttl_secs: parse_env("JOBGATE_JOB_TTL_SECS", d.job_ttl_secs),
        }
    }

    /// Upload limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));
        MonitorConfig {
            poll_interval,
            max_poll_interval: Duration::from_millis(self.poll_max_interval_ms).max(poll_interval),
            backoff_factor: self.backoff_factor(),
            max_duration: (self.job_timeout_secs > 0)
                .then(|| Duration::from_secs(self.job_timeout_secs)),
        }
    }

    /// `JOBGATE_POLL_BACKOFF`, falling back to a fixed interval when the
    /// value is not a finite number of at least `1.0`.
    fn backoff_factor(&self) -> f64 {
        if self.poll_backoff.is_finite() && self.poll_backoff >= 1.0 {
            return self.poll_backoff;
        }
        warn!(value = self.poll_backoff, "ignoring invalid JOBGATE_POLL_BACKOFF; using 1.0");
        1.0
    }

    pub fn job_template(&self) -> JobTemplate {
        let mut template = JobTemplate {
            image: self.runner_image.clone(),
            ttl_seconds_after_finished: self.job_ttl_secs,
            ..JobTemplate::default()
        };
        if let Some(script) = &self.runner_script {
            template.script = script.clone();
        }
        template
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
