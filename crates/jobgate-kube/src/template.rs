//! Manifests for the objects a job needs: a ConfigMap holding the archive
//! and a batch/v1 Job mounting it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Default runner command.
///
/// Unzips the archive, enters the first `PA2` directory and runs
/// `make -s run`. Anything going wrong prints `{"score":0}` so the pod log is
/// always a single JSON document.
pub const DEFAULT_SCRIPT: &str = concat!(
    "unzip /scripts/archive.zip -d $HOME >/dev/null 2>&1 && ",
    "PA2DIR=$(find $HOME -type d -name PA2 | head -n1) && ",
    "{ cd \"$PA2DIR\" 2>/dev/null || EXIT=1; } && ",
    "if [ \"$EXIT\" != \"1\" ]; then make -s run > /tmp/out 2>&1; EXIT=$?; fi; ",
    "if [ \"$EXIT\" != \"0\" ]; then echo '{\"score\":0}'; else cat /tmp/out; fi",
);

pub const DEFAULT_IMAGE: &str = "rsankar12/opencl_cse160";

const VOLUME_NAME: &str = "script-volume";
const MANAGED_BY: &str = "jobgate";

/// Shape of the Job created for every submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub image: String,
    /// Passed to `sh -c`.
    pub script: String,
    pub container_name: String,
    pub pull_policy: String,
    pub mount_path: String,
    /// Key of the archive inside the ConfigMap, and its file name in the mount.
    pub archive_key: String,
    pub ttl_seconds_after_finished: u32,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            script: DEFAULT_SCRIPT.to_owned(),
            container_name: "runner".to_owned(),
            pull_policy: "Always".to_owned(),
            mount_path: "/scripts".to_owned(),
            archive_key: "archive.zip".to_owned(),
            ttl_seconds_after_finished: 120,
        }
    }
}

impl JobTemplate {
    /// ConfigMap carrying `data` base64-encoded under [`Self::archive_key`].
    pub fn config_map(&self, name: &str, data: &[u8]) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "labels": { "app.kubernetes.io/managed-by": MANAGED_BY },
            },
            "binaryData": { self.archive_key.as_str(): STANDARD.encode(data) },
        })
    }

    /// Job `name` running the runner container with `config_map` mounted.
    ///
    /// The Kubernetes job controller labels its pods `job-name=<name>`, which
    /// is how the output pod is found later.
    pub fn job(&self, name: &str, config_map: &str) -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "labels": { "app.kubernetes.io/managed-by": MANAGED_BY },
            },
            "spec": {
                "ttlSecondsAfterFinished": self.ttl_seconds_after_finished,
                "backoffLimit": 0,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "volumes": [{
                            "name": VOLUME_NAME,
                            "configMap": { "name": config_map },
                        }],
                        "containers": [{
                            "name": self.container_name,
                            "image": self.image,
                            "imagePullPolicy": self.pull_policy,
                            "command": ["sh", "-c", self.script],
                            "volumeMounts": [{
                                "name": VOLUME_NAME,
                                "mountPath": self.mount_path,
                            }],
                        }],
                    },
                },
            },
        })
    }
}
