pub mod features;
pub mod server;
pub mod shared;

use features::environment::EnvironmentSettings;
use features::instance_management::controller::InstanceController;
use features::instance_management::repo::{FileInstanceStore, InMemoryInstanceStore, InstanceStore};
use features::instance_management::service::InstanceService;
use features::observability::controller::ObservabilityController;
use features::permissions::repo::HttpPermissionGateway;
use features::permissions::service::PermissionService;
use features::reconciliation::controller::ReconciliationController;
use features::reconciliation::service::ReconciliationService;
use features::verification::HttpExistenceVerifier;
use server::AppState;
use shared::config::{Config, ConfigError};
use shared::error::ControlPlaneError;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Failures that prevent the control plane from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error("Metrics registry error: {0}")]
    Metrics(String),
}

/// Fully wired control plane.
pub struct App {
    pub state: AppState,
    pub reconciliation: Arc<ReconciliationController>,
}

async fn open_store(config: &Config) -> Result<Arc<dyn InstanceStore>, StartupError> {
    if config.store_path.is_empty() {
        info!("Using in-memory instance store");
        return Ok(Arc::new(InMemoryInstanceStore::new()));
    }
    Ok(Arc::new(FileInstanceStore::open(&config.store_path).await?))
}

/// Validates `config` and connects every collaborator it names.
pub async fn build_app(config: &Config) -> Result<App, StartupError> {
    config.validate()?;
    let call_timeout = config.call_timeout();

    let observability = ObservabilityController::with_registry().map_err(StartupError::Metrics)?;
    let backend = k2m_deploy::connect_backend(config.backend_settings()?)
        .await
        .map_err(ControlPlaneError::from)?;
    info!(backend = %backend.kind(), "Deployment backend connected");
    let store = open_store(config).await?;

    let permissions = if config.permissions_enabled() {
        let gateway = HttpPermissionGateway::new(&config.permissions_v2_url, call_timeout)?;
        Some(Arc::new(PermissionService::new(
            Arc::new(gateway),
            &config.permissions_admin_token,
            call_timeout,
        )))
    } else {
        info!("Permission integration disabled, instances are scoped to their owner");
        None
    };

    let verifier = HttpExistenceVerifier::new(
        &config.analytics_pipeline_url,
        &config.import_deploy_url,
        permissions.clone(),
        call_timeout,
    )?;

    let mut service = InstanceService::new(
        store,
        backend,
        Arc::new(verifier),
        observability.clone(),
        EnvironmentSettings::from_config(config),
        &config.transfer_image,
    );
    if let Some(permissions) = permissions {
        service = service.with_permissions(permissions);
    }
    let service = Arc::new(service);
    let managed = service.refresh_managed_instances().await?;
    info!(count = managed, "Instance store loaded");

    let reconciliation = Arc::new(ReconciliationController::new(
        Arc::new(ReconciliationService::new(service.clone(), call_timeout)),
        observability.clone(),
    ));

    Ok(App {
        state: AppState {
            instances: Arc::new(InstanceController::new(service)),
            observability,
        },
        reconciliation,
    })
}
