//! jobgate-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON or pretty, plus an optional log file).
//! 3. Connect the Kubernetes backend.
//! 4. Build the gateway with an in-memory job store.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Optionally cancel and drain running job monitors.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jobgate_core::{Gateway, LatencyLog, MemoryJobStore};
use jobgate_kube::{KubeBackend, KubeConfig};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "jobgate-server starting");

    // ── 3. Kubernetes backend ──────────────────────────────────────────────────
    let kube_cfg = KubeConfig::from_env()?;
    info!(api = %kube_cfg.api_url, namespace = %kube_cfg.namespace, "kubernetes backend configured");
    let backend = KubeBackend::new(kube_cfg, cfg.job_template())?;

    // ── 4. Gateway ─────────────────────────────────────────────────────────────
    let mut gateway = Gateway::new(
        Arc::new(backend),
        Arc::new(MemoryJobStore::new()),
        cfg.monitor_config(),
    );
    if let Some(path) = &cfg.latency_file {
        let log = LatencyLog::open(path);
        let snapshot = log.snapshot().await;
        info!(path = %path, jobs = snapshot.jobs, "latency log loaded");
        gateway = gateway.with_latency_log(Arc::new(log));
    }
    let gateway = Arc::new(gateway);

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        gateway: Arc::clone(&gateway),
    });

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Job monitors ────────────────────────────────────────────────────────
    let monitors = gateway.monitors();
    let in_flight = monitors.in_flight();
    if cfg.cancel_on_shutdown && in_flight > 0 {
        info!(in_flight, "cancelling job monitors");
        monitors.cancel_all();
        let grace = Duration::from_secs(cfg.shutdown_grace_secs);
        if !monitors.drain(grace).await {
            warn!(
                remaining = monitors.in_flight(),
                grace_secs = cfg.shutdown_grace_secs,
                "job monitors did not finish cleanup in time"
            );
        }
    } else if in_flight > 0 {
        warn!(in_flight, "exiting with job monitors still running; their backend objects expire via TTL");
    }

    info!("jobgate-server stopped");
    Ok(())
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live until
/// the process exits.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: JOBGATE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let (json_layer, text_layer) = if cfg.log_json {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json();
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true);
        (None, Some(layer))
    };

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "jobgate-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
