pub mod features;
pub mod transport;

use async_trait::async_trait;
use k2m_core::{CoreError, Environment, RestartPolicy, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub use features::docker_engine::{DockerEngineBackend, DockerEngineSettings};
pub use features::in_memory::InMemoryBackend;
pub use features::rancher_v1::{RancherV1Backend, RancherV1Settings};
pub use features::rancher_v2::{RancherV2Backend, RancherV2Settings};

/// Everything a backend needs to provision one bridge workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    pub environment: Environment,
    pub restart: RestartPolicy,
}

impl WorkloadSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        environment: Environment,
        restart: RestartPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            environment,
            restart,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    DockerEngine,
    RancherV1,
    RancherV2,
    InMemory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DockerEngine => "docker",
            BackendKind::RancherV1 => "rancher1",
            BackendKind::RancherV2 => "rancher2",
            BackendKind::InMemory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(BackendKind::DockerEngine),
            "rancher1" => Ok(BackendKind::RancherV1),
            "rancher2" => Ok(BackendKind::RancherV2),
            "memory" => Ok(BackendKind::InMemory),
            other => Err(CoreError::Configuration(format!(
                "unknown deploy_mode: {other}"
            ))),
        }
    }
}

/// Capability every deployment target offers to the control plane.
///
/// `update` is remove-then-create and therefore not atomic: between the two
/// calls no workload runs for the instance, and the returned id generally
/// differs from the one passed in.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Provision and start a workload, returning its backend id.
    async fn create(&self, spec: &WorkloadSpec) -> Result<String>;

    async fn update(&self, workload_id: &str, spec: &WorkloadSpec) -> Result<String> {
        remove_if_present(self, workload_id).await?;
        self.create(spec).await
    }

    /// Stop and delete a workload. Reports `CoreError::WorkloadNotFound` when
    /// the backend no longer knows the id.
    async fn remove(&self, workload_id: &str) -> Result<()>;

    /// `Ok(false)` only for a definitive not-found; transport failures are errors.
    async fn exists(&self, workload_id: &str) -> Result<bool>;
}

/// Removes a workload, treating an already missing one as removed.
pub async fn remove_if_present<B>(backend: &B, workload_id: &str) -> Result<()>
where
    B: DeploymentBackend + ?Sized,
{
    if workload_id.is_empty() {
        return Ok(());
    }

    match backend.remove(workload_id).await {
        Err(CoreError::WorkloadNotFound(_)) => {
            warn!(%workload_id, backend = %backend.kind(), "Workload already gone");
            Ok(())
        }
        other => other,
    }
}

/// Backend selection and its settings, chosen once at startup.
#[derive(Debug, Clone)]
pub enum BackendSettings {
    DockerEngine(DockerEngineSettings),
    RancherV1(RancherV1Settings),
    RancherV2(RancherV2Settings),
    InMemory,
}

impl BackendSettings {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSettings::DockerEngine(_) => BackendKind::DockerEngine,
            BackendSettings::RancherV1(_) => BackendKind::RancherV1,
            BackendSettings::RancherV2(_) => BackendKind::RancherV2,
            BackendSettings::InMemory => BackendKind::InMemory,
        }
    }
}

pub async fn connect_backend(settings: BackendSettings) -> Result<Arc<dyn DeploymentBackend>> {
    let kind = settings.kind();
    let backend: Arc<dyn DeploymentBackend> = match settings {
        BackendSettings::DockerEngine(settings) => {
            Arc::new(DockerEngineBackend::connect(settings)?)
        }
        BackendSettings::RancherV1(settings) => Arc::new(RancherV1Backend::connect(settings).await?),
        BackendSettings::RancherV2(settings) => Arc::new(RancherV2Backend::connect(settings)?),
        BackendSettings::InMemory => Arc::new(InMemoryBackend::new()),
    };

    info!(backend = %kind, "Deployment backend ready");
    Ok(backend)
}
