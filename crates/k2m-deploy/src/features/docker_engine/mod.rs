pub mod repo;

use crate::{BackendKind, DeploymentBackend, WorkloadSpec};
use async_trait::async_trait;
use k2m_core::Result;
use repo::{BollardContainerEngineRepository, ContainerEngineRepository, ContainerRequest};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerEngineSettings {
    /// Network the bridge containers join; engine default when unset.
    pub network: Option<String>,
    /// Pull the image before every create.
    pub pull: bool,
}

/// Runs bridge workloads as containers on the local Docker Engine.
pub struct DockerEngineBackend {
    repo: Arc<dyn ContainerEngineRepository>,
    settings: DockerEngineSettings,
}

impl DockerEngineBackend {
    pub fn new(repo: Arc<dyn ContainerEngineRepository>, settings: DockerEngineSettings) -> Self {
        Self { repo, settings }
    }

    pub fn connect(settings: DockerEngineSettings) -> Result<Self> {
        let repo = Arc::new(BollardContainerEngineRepository::connect()?);
        Ok(Self::new(repo, settings))
    }

    fn container_request(&self, spec: &WorkloadSpec) -> ContainerRequest {
        ContainerRequest {
            name: spec.name.clone(),
            image: spec.image.clone(),
            env: spec
                .environment
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
            network_mode: self.settings.network.clone(),
            restart: spec.restart,
        }
    }
}

#[async_trait]
impl DeploymentBackend for DockerEngineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DockerEngine
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        if self.settings.pull {
            self.repo.pull_image(&spec.image).await.map_err(|e| {
                error!(image = %spec.image, error = %e, "Cannot pull image");
                e
            })?;
        }

        let container_id = self.repo.create_container(self.container_request(spec)).await?;
        self.repo.start_container(&container_id).await.map_err(|e| {
            error!(%container_id, error = %e, "Cannot start container");
            e
        })?;

        info!(name = %spec.name, %container_id, "Container started");
        Ok(container_id)
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        self.repo.stop_container(workload_id).await?;
        self.repo.remove_container(workload_id).await?;
        info!(container_id = %workload_id, "Container removed");
        Ok(())
    }

    async fn exists(&self, workload_id: &str) -> Result<bool> {
        self.repo.container_exists(workload_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k2m_core::{CoreError, Environment, RestartPolicy};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use repo::MockContainerEngineRepository;

    fn spec(restart: RestartPolicy) -> WorkloadSpec {
        let mut environment = Environment::new();
        environment.insert("KAFKA_TOPIC".to_string(), "events".to_string());
        environment.insert("MQTT_QOS".to_string(), "1".to_string());
        WorkloadSpec::new("k2m-abc", "bridge:dev", environment, restart)
    }

    #[tokio::test]
    async fn test_create_pulls_creates_and_starts() {
        let mut mock = MockContainerEngineRepository::new();
        let mut seq = Sequence::new();
        mock.expect_pull_image()
            .with(eq("bridge:dev"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_create_container()
            .withf(|request| {
                request.name == "k2m-abc"
                    && request.env == vec!["KAFKA_TOPIC=events".to_string(), "MQTT_QOS=1".to_string()]
                    && request.network_mode.as_deref() == Some("bridge-net")
                    && request.restart == RestartPolicy::Never
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("c-1".to_string()));
        mock.expect_start_container()
            .with(eq("c-1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let backend = DockerEngineBackend::new(
            Arc::new(mock),
            DockerEngineSettings {
                network: Some("bridge-net".to_string()),
                pull: true,
            },
        );

        let id = backend.create(&spec(RestartPolicy::Never)).await.unwrap();
        assert_eq!(id, "c-1");
    }

    #[tokio::test]
    async fn test_create_skips_pull_when_disabled() {
        let mut mock = MockContainerEngineRepository::new();
        mock.expect_pull_image().never();
        mock.expect_create_container()
            .returning(|_| Ok("c-2".to_string()));
        mock.expect_start_container().returning(|_| Ok(()));

        let backend = DockerEngineBackend::new(Arc::new(mock), DockerEngineSettings::default());
        assert_eq!(backend.create(&spec(RestartPolicy::Always)).await.unwrap(), "c-2");
    }

    #[tokio::test]
    async fn test_remove_stops_then_removes() {
        let mut mock = MockContainerEngineRepository::new();
        let mut seq = Sequence::new();
        mock.expect_stop_container()
            .with(eq("c-1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_remove_container()
            .with(eq("c-1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let backend = DockerEngineBackend::new(Arc::new(mock), DockerEngineSettings::default());
        backend.remove("c-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_reports_missing_container() {
        let mut mock = MockContainerEngineRepository::new();
        mock.expect_stop_container()
            .returning(|id| Err(CoreError::WorkloadNotFound(id.to_string())));
        mock.expect_remove_container().never();

        let backend = DockerEngineBackend::new(Arc::new(mock), DockerEngineSettings::default());
        assert_eq!(
            backend.remove("gone").await,
            Err(CoreError::WorkloadNotFound("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn test_exists_delegates_to_inspect() {
        let mut mock = MockContainerEngineRepository::new();
        mock.expect_container_exists()
            .with(eq("c-1"))
            .returning(|_| Ok(false));

        let backend = DockerEngineBackend::new(Arc::new(mock), DockerEngineSettings::default());
        assert!(!backend.exists("c-1").await.unwrap());
    }
}
