use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::KubeError;
use crate::kubeconfig;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Default bound for a single API request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PEM client certificate and PKCS#8 key presented to the API server.
#[derive(Clone)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity").finish_non_exhaustive()
    }
}

/// Connection settings for the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// Base URL of the API server, without a trailing slash.
    pub api_url: String,
    /// Namespace every object is created in.
    pub namespace: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// PEM bundle used to verify the API server certificate.
    pub ca_pem: Option<Vec<u8>>,
    /// Skip TLS verification. Only meant for local clusters.
    pub accept_invalid_certs: bool,
    /// Client certificate authentication, taken from a kubeconfig.
    pub identity: Option<ClientIdentity>,
    /// Upper bound for one API request, including reading its body.
    pub request_timeout: Duration,
}

impl KubeConfig {
    /// Settings for an unauthenticated endpoint such as `kubectl proxy`.
    pub fn with_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            namespace: "default".to_owned(),
            token: None,
            ca_pem: None,
            accept_invalid_certs: false,
            identity: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load settings from the environment.
    ///
    /// The API endpoint comes from `JOBGATE_KUBE_API` if set, then from the
    /// kubeconfig named by `KUBECONFIG`, then from in-cluster discovery.
    ///
    /// | Variable                       | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `JOBGATE_KUBE_API`             | unset                   |
    /// | `KUBECONFIG`                   | unset                   |
    /// | `JOBGATE_KUBE_NAMESPACE`       | discovered ns or `default` |
    /// | `JOBGATE_KUBE_TOKEN`           | discovered token        |
    /// | `JOBGATE_KUBE_INSECURE`        | discovered or `false`   |
    /// | `JOBGATE_KUBE_TIMEOUT_SECS`    | `30`                    |
    pub fn from_env() -> Result<Self, KubeError> {
        let sa_dir = PathBuf::from(SERVICE_ACCOUNT_DIR);

        let mut cfg = match (non_empty("JOBGATE_KUBE_API"), non_empty("KUBECONFIG")) {
            (Some(url), _) => Self::with_url(url),
            (None, Some(path)) => Self::from_kubeconfig(Path::new(&path))?,
            (None, None) => Self::in_cluster(&sa_dir)?,
        };

        if let Ok(ns) = std::env::var("JOBGATE_KUBE_NAMESPACE") {
            if !ns.trim().is_empty() {
                cfg.namespace = ns.trim().to_owned();
            }
        }
        if let Ok(token) = std::env::var("JOBGATE_KUBE_TOKEN") {
            cfg.token = Some(token);
        }
        if let Ok(v) = std::env::var("JOBGATE_KUBE_INSECURE") {
            cfg.accept_invalid_certs = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(secs) = non_empty("JOBGATE_KUBE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.request_timeout = Duration::from_secs(secs.max(1));
        }

        Ok(cfg)
    }

    /// Settings of the current context of a kubeconfig file.
    pub fn from_kubeconfig(path: &Path) -> Result<Self, KubeError> {
        kubeconfig::load(path)
    }

    /// Service-account discovery as done for pods running inside the cluster.
    pub fn in_cluster(sa_dir: &Path) -> Result<Self, KubeError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            KubeError::NotConfigured(
                "set JOBGATE_KUBE_API or KUBECONFIG, or run inside a cluster (KUBERNETES_SERVICE_HOST is unset)"
                    .into(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());

        // IPv6 service hosts must be bracketed in the URL.
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let token = read_trimmed(&sa_dir.join("token"))?;
        let ca_path = sa_dir.join("ca.crt");
        let ca_pem = std::fs::read(&ca_path).map_err(|source| KubeError::Io {
            path: ca_path.display().to_string(),
            source,
        })?;
        let namespace = read_trimmed(&sa_dir.join("namespace")).unwrap_or_else(|_| "default".into());

        Ok(Self {
            namespace,
            token: Some(token),
            ca_pem: Some(ca_pem),
            ..Self::with_url(format!("https://{host}:{port}"))
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn read_trimmed(path: &Path) -> Result<String, KubeError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .map_err(|source| KubeError::Io {
            path: path.display().to_string(),
            source,
        })
}
