use crate::transport::{join_url, BasicAuthTransport, HttpRequest, HttpTransport};
use crate::{BackendKind, DeploymentBackend, WorkloadSpec};
use async_trait::async_trait;
use k2m_core::{CoreError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SELECTOR_LABEL: &str = "kafka2mqtt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RancherV2Settings {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub namespace_id: String,
    pub project_id: String,
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadRequest<'a> {
    name: &'a str,
    namespace_id: &'a str,
    containers: Vec<ContainerSpec<'a>>,
    scheduling: Scheduling,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<&'static str, &'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<Selector<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerSpec<'a> {
    image: &'a str,
    name: &'a str,
    env: Vec<EnvVar<'a>>,
    image_pull_policy: &'static str,
}

#[derive(Serialize)]
struct EnvVar<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct Scheduling {
    scheduler: &'static str,
    node: NodeScheduling,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeScheduling {
    require_all: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Selector<'a> {
    match_labels: BTreeMap<&'static str, &'a str>,
}

/// Runs bridge workloads as Rancher 2 deployments (restarting) or jobs (run-once).
///
/// Workload ids are the workload names.
pub struct RancherV2Backend {
    transport: Arc<dyn HttpTransport>,
    url: String,
    namespace_id: String,
    project_id: String,
}

impl RancherV2Backend {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: impl Into<String>,
        namespace_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            namespace_id: namespace_id.into(),
            project_id: project_id.into(),
        }
    }

    pub fn connect(settings: RancherV2Settings) -> Result<Self> {
        let transport = Arc::new(BasicAuthTransport::new(
            settings.access_key,
            settings.secret_key,
            settings.accept_invalid_certs,
            settings.timeout,
        )?);
        Ok(Self::new(
            transport,
            settings.url,
            settings.namespace_id,
            settings.project_id,
        ))
    }

    fn project_url(&self, path: &str) -> String {
        join_url(&self.url, &format!("projects/{}/{path}", self.project_id))
    }

    fn workload_urls(&self, workload_id: &str) -> [String; 2] {
        ["deployment", "job"].map(|kind| {
            self.project_url(&format!(
                "workloads/{kind}:{}:{workload_id}",
                self.namespace_id
            ))
        })
    }

    fn request_body(&self, spec: &WorkloadSpec) -> Result<serde_json::Value> {
        let restarts = spec.restart.restarts();
        let request = WorkloadRequest {
            name: &spec.name,
            namespace_id: &self.namespace_id,
            containers: vec![ContainerSpec {
                image: &spec.image,
                name: &spec.name,
                env: spec
                    .environment
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.as_str(),
                        value: value.as_str(),
                    })
                    .collect(),
                image_pull_policy: "Always",
            }],
            scheduling: Scheduling {
                scheduler: "default-scheduler",
                node: NodeScheduling {
                    require_all: vec!["role=worker"],
                },
            },
            labels: restarts.then(|| BTreeMap::from([(SELECTOR_LABEL, spec.name.as_str())])),
            selector: restarts.then(|| Selector {
                match_labels: BTreeMap::from([(SELECTOR_LABEL, spec.name.as_str())]),
            }),
        };
        serde_json::to_value(&request).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl DeploymentBackend for RancherV2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::RancherV2
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        let url = if spec.restart.restarts() {
            self.project_url("workloads")
        } else {
            self.project_url("jobs")
        };
        let response = self
            .transport
            .send(HttpRequest::post(url, self.request_body(spec)?))
            .await?;

        if response.status != 201 {
            error!(status = response.status, body = %response.body, "Rancher rejected workload");
            return Err(CoreError::Backend(format!(
                "could not create export: status {}",
                response.status
            )));
        }

        info!(name = %spec.name, "Rancher workload created");
        Ok(spec.name.clone())
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        for url in self.workload_urls(workload_id) {
            let response = self.transport.send(HttpRequest::delete(url)).await?;
            match response.status {
                204 => return Ok(()),
                404 => continue,
                status => {
                    return Err(CoreError::Backend(format!(
                        "could not delete export {workload_id}: status {status}: {}",
                        response.body
                    )))
                }
            }
        }
        Err(CoreError::WorkloadNotFound(workload_id.to_string()))
    }

    async fn exists(&self, workload_id: &str) -> Result<bool> {
        for url in self.workload_urls(workload_id) {
            let response = self.transport.send(HttpRequest::get(url)).await?;
            match response.status {
                200 => return Ok(true),
                404 => continue,
                status => return Err(CoreError::Backend(format!("unexpected status {status}"))),
            }
        }
        Ok(false)
    }
}
