use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, HostConfig, RestartPolicy as EngineRestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use futures_util::stream::TryStreamExt;
use k2m_core::{CoreError, RestartPolicy, Result};
use tracing::debug;

/// Container definition handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub network_mode: Option<String>,
    pub restart: RestartPolicy,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngineRepository: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<()>;
    async fn create_container(&self, request: ContainerRequest) -> Result<String>;
    async fn start_container(&self, container_id: &str) -> Result<()>;
    async fn stop_container(&self, container_id: &str) -> Result<()>;
    async fn remove_container(&self, container_id: &str) -> Result<()>;
    async fn container_exists(&self, container_id: &str) -> Result<bool>;
}

pub struct BollardContainerEngineRepository {
    docker: Docker,
}

impl BollardContainerEngineRepository {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| CoreError::Backend(format!("failed to connect to docker: {e}")))?;
        Ok(Self { docker })
    }
}

fn engine_restart_policy(restart: RestartPolicy) -> EngineRestartPolicy {
    let name = match restart {
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::Never => RestartPolicyNameEnum::NO,
    };
    EngineRestartPolicy {
        name: Some(name),
        ..Default::default()
    }
}

fn status_code(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn map_engine_error(container_id: &str, error: BollardError) -> CoreError {
    match status_code(&error) {
        Some(404) => CoreError::WorkloadNotFound(container_id.to_string()),
        _ => CoreError::Backend(error.to_string()),
    }
}

#[async_trait]
impl ContainerEngineRepository for BollardContainerEngineRepository {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        });

        let mut pull_stream = self.docker.create_image(options, None, None);
        while let Some(progress) = pull_stream
            .try_next()
            .await
            .map_err(|e| CoreError::Backend(format!("cannot pull image {image}: {e}")))?
        {
            if let Some(status) = progress.status {
                debug!(%image, %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, request: ContainerRequest) -> Result<String> {
        let options = Some(CreateContainerOptions {
            name: Some(request.name.clone()),
            platform: String::new(),
        });
        let body = ContainerCreateBody {
            image: Some(request.image),
            env: Some(request.env),
            host_config: Some(HostConfig {
                network_mode: request.network_mode,
                restart_policy: Some(engine_restart_policy(request.restart)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(options, body)
            .await
            .map_err(|e| CoreError::Backend(format!("cannot create container: {e}")))?;
        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_engine_error(container_id, e))
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_engine_error(container_id, e)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: false,
            link: false,
        });
        self.docker
            .remove_container(container_id, options)
            .await
            .map_err(|e| map_engine_error(container_id, e))
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(CoreError::Backend(e.to_string())),
        }
    }
}
