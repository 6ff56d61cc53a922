use crate::transport::{join_url, BasicAuthTransport, HttpRequest, HttpResponse, HttpTransport};
use crate::{remove_if_present, BackendKind, DeploymentBackend, WorkloadSpec};
use async_trait::async_trait;
use k2m_core::{CoreError, Environment, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_RENAME_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RancherV1Settings {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub stack_id: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    stack_id: &'a str,
    scale: u32,
    start_on_create: bool,
    launch_config: LaunchConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchConfig<'a> {
    image_uuid: String,
    environment: &'a Environment,
    labels: BTreeMap<&'static str, &'static str>,
}

#[derive(Deserialize)]
struct ServiceCreated {
    id: Option<String>,
}

enum CreateOutcome {
    Created(String),
    NameTaken,
}

/// Runs bridge workloads as Rancher 1 services inside one stack.
pub struct RancherV1Backend {
    transport: Arc<dyn HttpTransport>,
    url: String,
    stack_id: String,
}

impl RancherV1Backend {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: impl Into<String>,
        stack_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            stack_id: stack_id.into(),
        }
    }

    /// Builds the backend and verifies the configured stack is reachable.
    pub async fn connect(settings: RancherV1Settings) -> Result<Self> {
        let transport = Arc::new(BasicAuthTransport::new(
            settings.access_key,
            settings.secret_key,
            false,
            settings.timeout,
        )?);
        let backend = Self::new(transport, settings.url, settings.stack_id);
        backend.self_check().await?;
        Ok(backend)
    }

    pub async fn self_check(&self) -> Result<()> {
        let url = join_url(&self.url, &format!("stacks/{}", self.stack_id));
        let response = self.transport.send(HttpRequest::get(url)).await?;
        if response.status != 200 {
            return Err(CoreError::Backend(format!(
                "rancher unexpected status code: {}",
                response.status
            )));
        }
        Ok(())
    }

    fn service_url(&self, id: &str) -> String {
        join_url(&self.url, &format!("services/{id}"))
    }

    fn request_body(&self, name: &str, spec: &WorkloadSpec) -> Result<serde_json::Value> {
        let mut labels = BTreeMap::from([
            ("io.rancher.container.pull_image", "always"),
            ("io.rancher.scheduler.affinity:host_label", "role=worker"),
        ]);
        if !spec.restart.restarts() {
            labels.insert("io.rancher.container.start_once", "true");
        }

        let request = ServiceRequest {
            kind: "service",
            name,
            stack_id: &self.stack_id,
            scale: 1,
            start_on_create: true,
            launch_config: LaunchConfig {
                image_uuid: format!("docker:{}", spec.image),
                environment: &spec.environment,
                labels,
            },
        };
        serde_json::to_value(&request).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    async fn create_named(&self, name: &str, spec: &WorkloadSpec) -> Result<CreateOutcome> {
        let body = self.request_body(name, spec)?;
        let response = self
            .transport
            .send(HttpRequest::post(join_url(&self.url, "services"), body))
            .await?;

        match response.status {
            201 => parse_service_id(&response).map(CreateOutcome::Created),
            422 => Ok(CreateOutcome::NameTaken),
            status => {
                error!(%status, body = %response.body, "Rancher rejected service creation");
                Err(CoreError::Backend(format!(
                    "could not create instance: status {status}"
                )))
            }
        }
    }
}

fn parse_service_id(response: &HttpResponse) -> Result<String> {
    let created: ServiceCreated = serde_json::from_str(&response.body)
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    created
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoreError::Backend("could not get service id".to_string()))
}

#[async_trait]
impl DeploymentBackend for RancherV1Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::RancherV1
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        match self.create_named(&spec.name, spec).await? {
            CreateOutcome::Created(id) => {
                info!(name = %spec.name, service_id = %id, "Rancher service created");
                Ok(id)
            }
            CreateOutcome::NameTaken => Err(CoreError::Backend(format!(
                "service name {} already in use",
                spec.name
            ))),
        }
    }

    async fn update(&self, workload_id: &str, spec: &WorkloadSpec) -> Result<String> {
        remove_if_present(self, workload_id).await?;

        // Rancher keeps names of removed services reserved for a while.
        for attempt in 1..=MAX_RENAME_ATTEMPTS {
            let name = format!("{}-{:x}", spec.name, rand::random::<u64>());
            match self.create_named(&name, spec).await? {
                CreateOutcome::Created(id) => {
                    info!(%name, service_id = %id, "Rancher service re-created");
                    return Ok(id);
                }
                CreateOutcome::NameTaken => {
                    warn!(%name, attempt, "Rancher service name taken, retrying");
                }
            }
        }

        Err(CoreError::Backend(format!(
            "no free service name for {} after {MAX_RENAME_ATTEMPTS} attempts",
            spec.name
        )))
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        let response = self
            .transport
            .send(HttpRequest::delete(self.service_url(workload_id)))
            .await?;
        match response.status {
            200 => Ok(()),
            404 => Err(CoreError::WorkloadNotFound(workload_id.to_string())),
            status => Err(CoreError::Backend(format!(
                "unexpected status code while removing service {workload_id}: {status}"
            ))),
        }
    }

    async fn exists(&self, workload_id: &str) -> Result<bool> {
        let response = self
            .transport
            .send(HttpRequest::get(self.service_url(workload_id)))
            .await?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(CoreError::Backend(format!("unexpected status {status}"))),
        }
    }
}
