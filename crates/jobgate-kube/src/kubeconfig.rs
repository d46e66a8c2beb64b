//! Reader for the kubeconfig files used by `kubectl`.
//!
//! Only the current context is resolved: its cluster (server, CA, TLS
//! verification), its user (token or client certificate) and its namespace.
//! Exec and auth-provider plugins are not supported.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::config::{ClientIdentity, KubeConfig};
use crate::error::KubeError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    token_file: Option<String>,
    #[serde(default)]
    client_certificate: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

/// Load the current context of the kubeconfig at `path`.
///
/// Relative file references inside the kubeconfig are resolved against the
/// directory containing it.
pub(crate) fn load(path: &Path) -> Result<KubeConfig, KubeError> {
    let raw = std::fs::read_to_string(path).map_err(|source| KubeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve(&raw, &base).map_err(|message| KubeError::Kubeconfig {
        path: path.display().to_string(),
        message,
    })
}

fn resolve(raw: &str, base: &Path) -> Result<KubeConfig, String> {
    let doc: Kubeconfig = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;

    let context_name = doc
        .current_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or("current-context is not set")?;
    let context = doc
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .map(|c| &c.context)
        .ok_or_else(|| format!("context {context_name:?} not found"))?;
    let cluster = doc
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| format!("cluster {:?} not found", context.cluster))?;
    let user = match &context.user {
        Some(name) => Some(
            doc.users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| &u.user)
                .ok_or_else(|| format!("user {name:?} not found"))?,
        ),
        None => None,
    };

    let mut cfg = KubeConfig::with_url(&cluster.server);
    if let Some(ns) = context.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        cfg.namespace = ns.to_owned();
    }
    cfg.accept_invalid_certs = cluster.insecure_skip_tls_verify;
    cfg.ca_pem = material(
        "certificate-authority",
        cluster.certificate_authority_data.as_deref(),
        cluster.certificate_authority.as_deref(),
        base,
    )?;

    if let Some(user) = user {
        cfg.token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => {
                let path = relative_to(base, file);
                let token = std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                Some(token.trim().to_owned())
            }
            (None, None) => None,
        };

        let cert = material(
            "client-certificate",
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base,
        )?;
        let key = material(
            "client-key",
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base,
        )?;
        cfg.identity = match (cert, key) {
            (Some(cert_pem), Some(key_pem)) => Some(ClientIdentity { cert_pem, key_pem }),
            (None, None) => None,
            _ => return Err("client certificate and key must be set together".into()),
        };
    }

    Ok(cfg)
}

/// Inline base64 `*-data` wins over a file reference.
fn material(
    what: &str,
    data: Option<&str>,
    file: Option<&str>,
    base: &Path,
) -> Result<Option<Vec<u8>>, String> {
    if let Some(data) = data {
        return STANDARD
            .decode(data.trim())
            .map(Some)
            .map_err(|e| format!("{what}-data is not valid base64: {e}"));
    }
    match file {
        Some(file) => {
            let path = relative_to(base, file);
            std::fs::read(&path)
                .map(Some)
                .map_err(|e| format!("failed to read {what} {}: {e}", path.display()))
        }
        None => Ok(None),
    }
}

fn relative_to(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const KIND: &str = r#"
apiVersion: v1
kind: Config
current-context: kind-grader
clusters:
- name: kind-grader
  cluster:
    server: https://127.0.0.1:6443/
    certificate-authority-data: Q0EtUEVN
- name: other
  cluster:
    server: https://10.0.0.1
contexts:
- name: kind-grader
  context:
    cluster: kind-grader
    user: kind-grader
    namespace: grading
- name: other
  context:
    cluster: other
users:
- name: kind-grader
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
"#;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("jobgate-kubeconfig-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn current_context_is_resolved() {
        let cfg = resolve(KIND, Path::new("/nonexistent")).unwrap();
        assert_eq!(cfg.api_url, "https://127.0.0.1:6443");
        assert_eq!(cfg.namespace, "grading");
        assert_eq!(cfg.ca_pem.as_deref(), Some(&b"CA-PEM"[..]));
        assert!(cfg.token.is_none());
        let identity = cfg.identity.expect("client certificate");
        assert_eq!(identity.cert_pem, b"CERT");
        assert_eq!(identity.key_pem, b"KEY");
        assert!(!cfg.accept_invalid_certs);
    }

    #[test]
    fn context_without_user_or_namespace_uses_defaults() {
        let raw = KIND.replace("current-context: kind-grader", "current-context: other");
        let cfg = resolve(&raw, Path::new("/nonexistent")).unwrap();
        assert_eq!(cfg.api_url, "https://10.0.0.1");
        assert_eq!(cfg.namespace, "default");
        assert!(cfg.identity.is_none() && cfg.token.is_none() && cfg.ca_pem.is_none());
    }

    #[test]
    fn file_references_are_relative_to_the_kubeconfig() {
        let dir = scratch("files");
        std::fs::write(dir.join("ca.crt"), "FILE-CA").unwrap();
        std::fs::write(dir.join("token"), "file-token\n").unwrap();
        let path = dir.join("config");
        std::fs::write(
            &path,
            r#"
current-context: c
clusters:
- name: c
  cluster:
    server: https://cluster.local
    certificate-authority: ca.crt
    insecure-skip-tls-verify: true
contexts:
- name: c
  context: {cluster: c, user: u}
users:
- name: u
  user:
    token-file: token
"#,
        )
        .unwrap();

        let cfg = load(&path).unwrap();
        assert_eq!(cfg.ca_pem.as_deref(), Some(&b"FILE-CA"[..]));
        assert_eq!(cfg.token.as_deref(), Some("file-token"));
        assert!(cfg.accept_invalid_certs);
    }

    #[test]
    fn broken_kubeconfigs_are_reported() {
        let err = resolve("clusters: []\n", Path::new("/")).unwrap_err();
        assert_eq!(err, "current-context is not set");

        let raw = KIND.replace("current-context: kind-grader", "current-context: missing");
        let err = resolve(&raw, Path::new("/")).unwrap_err();
        assert!(err.contains("\"missing\" not found"), "{err}");

        let raw = KIND.replace("client-key-data: S0VZ", "token: t");
        let err = resolve(&raw, Path::new("/")).unwrap_err();
        assert!(err.contains("set together"), "{err}");

        let dir = scratch("missing");
        match load(&dir.join("absent")) {
            Err(KubeError::Io { path, .. }) => assert!(path.ends_with("absent")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
