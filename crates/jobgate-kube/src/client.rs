use async_trait::async_trait;
use bytes::Bytes;
use jobgate_core::{
    ArtifactHandle, BackendError, ExecutionBackend, ExecutionUnit, OutputSource, UnitStatus,
};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use crate::config::KubeConfig;
use crate::error::{KubeError, rejection, transport};
use crate::template::JobTemplate;

/// [`ExecutionBackend`] talking to the Kubernetes REST API.
///
/// Artifacts are ConfigMaps, execution units are batch/v1 Jobs and output
/// is the log of the first pod the Job controller started.
#[derive(Debug, Clone)]
pub struct KubeBackend {
    client: Client,
    config: KubeConfig,
    template: JobTemplate,
}

#[derive(Debug, Deserialize)]
struct JobObject {
    #[serde(default)]
    status: JobStatusFields,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatusFields {
    #[serde(default)]
    succeeded: Option<i32>,
    #[serde(default)]
    failed: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

impl KubeBackend {
    pub fn new(config: KubeConfig, template: JobTemplate) -> Result<Self, KubeError> {
        let mut builder = Client::builder()
            .user_agent(concat!("jobgate/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(pem) = &config.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if let Some(id) = &config.identity {
            builder = builder.identity(reqwest::Identity::from_pkcs8_pem(&id.cert_pem, &id.key_pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            config,
            template,
        })
    }

    pub fn config(&self) -> &KubeConfig {
        &self.config
    }

    pub fn template(&self) -> &JobTemplate {
        &self.template
    }

    fn config_maps_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps",
            self.config.api_url, self.config.namespace
        )
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.config.api_url, self.config.namespace
        )
    }

    fn pods_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods",
            self.config.api_url, self.config.namespace
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send `req` and fail on any non-2xx answer.
    async fn send(
        &self,
        req: RequestBuilder,
        kind: &'static str,
        name: &str,
    ) -> Result<Response, BackendError> {
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(rejection(status.as_u16(), kind, name, &body))
    }

    /// DELETE with background propagation; an object that is already gone
    /// counts as deleted.
    async fn delete(&self, collection: String, kind: &'static str, name: &str) -> Result<(), BackendError> {
        let url = format!("{collection}/{name}?propagationPolicy=Background");
        debug!(kind, name, "deleting");
        match self.send(self.request(Method::DELETE, &url), kind, name).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ExecutionBackend for KubeBackend {
    async fn create_artifact(&self, name: &str, data: Bytes) -> Result<ArtifactHandle, BackendError> {
        let manifest = self.template.config_map(name, &data);
        debug!(name, bytes = data.len(), "creating configmap");
        self.send(
            self.request(Method::POST, &self.config_maps_url()).json(&manifest),
            "configmap",
            name,
        )
        .await?;
        Ok(ArtifactHandle { name: name.to_owned() })
    }

    async fn create_execution_unit(
        &self,
        name: &str,
        artifact: &ArtifactHandle,
    ) -> Result<ExecutionUnit, BackendError> {
        let manifest = self.template.job(name, &artifact.name);
        debug!(name, image = %self.template.image, "creating job");
        self.send(
            self.request(Method::POST, &self.jobs_url()).json(&manifest),
            "job",
            name,
        )
        .await?;
        Ok(ExecutionUnit { name: name.to_owned() })
    }

    async fn unit_status(&self, name: &str) -> Result<UnitStatus, BackendError> {
        let url = format!("{}/{name}", self.jobs_url());
        let job: JobObject = self
            .send(self.request(Method::GET, &url), "job", name)
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(job.status.unit_status())
    }

    async fn output_source(&self, name: &str) -> Result<OutputSource, BackendError> {
        // `=` percent-encoded; the selector is the label the job controller sets.
        let url = format!("{}?labelSelector=job-name%3D{name}", self.pods_url());
        let pods: PodList = self
            .send(self.request(Method::GET, &url), "pods of job", name)
            .await?
            .json()
            .await
            .map_err(transport)?;

        pods.items
            .into_iter()
            .next()
            .map(|pod| OutputSource { name: pod.metadata.name })
            .ok_or_else(|| BackendError::NoOutput { unit: name.to_owned() })
    }

    async fn read_output(&self, source: &OutputSource) -> Result<Bytes, BackendError> {
        let url = format!("{}/{}/log", self.pods_url(), source.name);
        self.send(self.request(Method::GET, &url), "pod", &source.name)
            .await?
            .bytes()
            .await
            .map_err(transport)
    }

    async fn delete_artifact(&self, name: &str) -> Result<(), BackendError> {
        self.delete(self.config_maps_url(), "configmap", name).await
    }

    async fn delete_execution_unit(&self, name: &str) -> Result<(), BackendError> {
        self.delete(self.jobs_url(), "job", name).await
    }
}

impl JobStatusFields {
    fn unit_status(&self) -> UnitStatus {
        if self.succeeded.unwrap_or(0) > 0 {
            UnitStatus::Succeeded
        } else if self.failed.unwrap_or(0) > 0 {
            UnitStatus::Failed
        } else {
            UnitStatus::Running
        }
    }
}
