use crate::features::environment::{derive_environment, EnvironmentSettings};
use crate::features::instance_management::repo::{InstanceQuery, InstanceStore, Scope};
use crate::features::observability::controller::ObservabilityController;
use crate::features::permissions::repo::Permission;
use crate::features::permissions::service::PermissionService;
use crate::features::verification::ExistenceVerifier;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::timeout::bounded;
use crate::shared::types::{Caller, Instance, InstanceList, ListInstancesRequest, RestartPolicy};
use chrono::{DateTime, Utc};
use k2m_core::{generate_instance_id, rotated_consumer_group_id, OFFSET_SMALLEST};
use k2m_deploy::{remove_if_present, DeploymentBackend, WorkloadSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Whether an update must move the bridge to a fresh consumer group.
///
/// A changed offset only takes effect for a group without committed
/// positions; with `smallest`, changed values need a full replay as well.
pub fn needs_new_consumer_group(stored: &Instance, incoming: &Instance) -> bool {
    stored.offset != incoming.offset
        || (stored.offset == OFFSET_SMALLEST && stored.values != incoming.values)
}

fn later_than(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Service for managing export instances and their workloads
pub struct InstanceService {
    store: Arc<dyn InstanceStore>,
    backend: Arc<dyn DeploymentBackend>,
    verifier: Arc<dyn ExistenceVerifier>,
    permissions: Option<Arc<PermissionService>>,
    observability: Arc<ObservabilityController>,
    settings: EnvironmentSettings,
    transfer_image: String,
}

impl InstanceService {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        backend: Arc<dyn DeploymentBackend>,
        verifier: Arc<dyn ExistenceVerifier>,
        observability: Arc<ObservabilityController>,
        settings: EnvironmentSettings,
        transfer_image: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            verifier,
            permissions: None,
            observability,
            settings,
            transfer_image: transfer_image.into(),
        }
    }

    /// Enables access control through the permission service.
    pub fn with_permissions(mut self, permissions: Arc<PermissionService>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn permissions(&self) -> Option<&Arc<PermissionService>> {
        self.permissions.as_ref()
    }

    fn call_timeout(&self) -> Duration {
        self.settings.call_timeout
    }

    fn track<T>(&self, operation: &str, result: &ControlPlaneResult<T>) {
        self.observability
            .record_workload_operation(operation, result.is_ok());
    }

    /// Sets the managed-instances gauge to the number of stored records.
    pub async fn refresh_managed_instances(&self) -> ControlPlaneResult<usize> {
        let (_, total) = bounded(
            self.call_timeout(),
            "store.list",
            self.store.list(&InstanceQuery::page(0, 0)),
        )
        .await?;
        self.observability.set_managed_instances(total);
        Ok(total)
    }

    async fn note_instance_count(&self) {
        if let Err(e) = self.refresh_managed_instances().await {
            warn!(error = %e, "Managed instance count not refreshed");
        }
    }

    /// Derives the environment of `instance` and starts a new workload for it.
    pub async fn provision(
        &self,
        instance: &Instance,
        caller: &Caller,
        verify: bool,
    ) -> ControlPlaneResult<String> {
        let environment = derive_environment(
            instance,
            caller,
            verify,
            &self.settings,
            self.verifier.as_ref(),
        )
        .await?;
        let spec = WorkloadSpec::new(
            instance.workload_name(),
            &self.transfer_image,
            environment,
            RestartPolicy::Always,
        );

        let result = bounded(self.call_timeout(), "backend.create", self.backend.create(&spec)).await;
        self.track("create", &result);
        result.inspect_err(|e| {
            error!(call = "backend.create", instance_id = %instance.id, error = %e, "Workload creation failed")
        })
    }

    /// Existence of a workload; an empty id never exists.
    pub async fn workload_exists(&self, workload_id: &str) -> ControlPlaneResult<bool> {
        if workload_id.is_empty() {
            return Ok(false);
        }
        bounded(
            self.call_timeout(),
            "backend.exists",
            self.backend.exists(workload_id),
        )
        .await
    }

    /// Looks up one record the caller holds `permission` on (or owns).
    async fn find_accessible(
        &self,
        id: &str,
        caller: &Caller,
        permission: Permission,
    ) -> ControlPlaneResult<Instance> {
        let owner = match &self.permissions {
            Some(permissions) => {
                if !permissions.can(&caller.token, id, permission).await? {
                    return Err(ControlPlaneError::InstanceNotFound(id.to_string()));
                }
                None
            }
            None => Some(caller.user_id.as_str()),
        };

        bounded(self.call_timeout(), "store.get", self.store.get(id, owner))
            .await?
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.to_string()))
    }

    /// List instances visible to the caller
    pub async fn list(
        &self,
        caller: &Caller,
        request: &ListInstancesRequest,
    ) -> ControlPlaneResult<InstanceList> {
        let mut query = InstanceQuery::from_request(request, Scope::All)?;
        query.scope = match &self.permissions {
            Some(permissions) => Scope::Ids(
                permissions
                    .accessible_ids(&caller.token, Permission::Read)
                    .await?
                    .into_iter()
                    .collect(),
            ),
            None => Scope::Owner(caller.user_id.clone()),
        };

        let (instances, total) =
            bounded(self.call_timeout(), "store.list", self.store.list(&query)).await?;
        Ok(InstanceList {
            count: instances.len(),
            instances,
            total,
        })
    }

    pub async fn read(&self, id: &str, caller: &Caller) -> ControlPlaneResult<Instance> {
        self.find_accessible(id, caller, Permission::Read).await
    }

    /// Create a new instance and start its workload
    pub async fn create(
        &self,
        mut instance: Instance,
        caller: &Caller,
    ) -> ControlPlaneResult<Instance> {
        if !instance.id.is_empty() {
            return Err(ControlPlaneError::ValidationError(
                "explicit setting of id not allowed".to_string(),
            ));
        }
        instance.id = generate_instance_id();
        instance.user_id = caller.user_id.clone();
        instance.consumer_group_id = None;
        instance.normalize_custom_base_topic();

        instance.service_id = self.provision(&instance, caller, true).await?;

        let now = Utc::now();
        instance.created_at = now;
        instance.updated_at = now;
        bounded(
            self.call_timeout(),
            "store.put",
            self.store.put(instance.clone()),
        )
        .await
        .inspect_err(|e| {
            error!(call = "store.put", instance_id = %instance.id, service_id = %instance.service_id, error = %e, "Workload left without record")
        })?;

        if let Some(permissions) = &self.permissions {
            if let Err(e) = permissions
                .grant_full(&caller.token, &instance.id, &instance.user_id)
                .await
            {
                warn!(call = "permissions.set_permission", instance_id = %instance.id, error = %e, "Grant failed, left for permission reconciliation");
            }
        }

        self.note_instance_count().await;
        info!(instance_id = %instance.id, service_id = %instance.service_id, "Instance created successfully");
        Ok(instance)
    }

    /// Replace an instance and redeploy its workload
    pub async fn update(&self, mut instance: Instance, caller: &Caller) -> ControlPlaneResult<()> {
        if instance.id.is_empty() {
            return Err(ControlPlaneError::ValidationError(
                "Instance ID cannot be empty".to_string(),
            ));
        }
        let stored = self
            .find_accessible(&instance.id, caller, Permission::Write)
            .await?;

        instance.user_id = stored.user_id.clone();
        instance.created_at = stored.created_at;
        instance.service_id = stored.service_id.clone();
        instance.consumer_group_id = stored.consumer_group_id.clone();
        instance.normalize_custom_base_topic();
        if needs_new_consumer_group(&stored, &instance) {
            let group = rotated_consumer_group_id(&instance.id);
            info!(instance_id = %instance.id, consumer_group = %group, "Rotating consumer group");
            instance.consumer_group_id = Some(group);
        }

        let environment = derive_environment(
            &instance,
            caller,
            true,
            &self.settings,
            self.verifier.as_ref(),
        )
        .await?;
        let spec = WorkloadSpec::new(
            instance.workload_name(),
            &self.transfer_image,
            environment,
            RestartPolicy::Always,
        );

        let result = bounded(
            self.call_timeout(),
            "backend.update",
            self.backend.update(&stored.service_id, &spec),
        )
        .await;
        self.track("update", &result);
        instance.service_id = result.inspect_err(|e| {
            error!(call = "backend.update", instance_id = %instance.id, error = %e, "Workload update failed")
        })?;

        instance.updated_at = later_than(stored.updated_at);
        bounded(
            self.call_timeout(),
            "store.put",
            self.store.put(instance.clone()),
        )
        .await
        .inspect_err(|e| {
            error!(call = "store.put", instance_id = %instance.id, service_id = %instance.service_id, error = %e, "Updated workload left without record")
        })?;

        info!(instance_id = %instance.id, service_id = %instance.service_id, "Instance updated successfully");
        Ok(())
    }

    /// Delete instances together with their workloads and permission entries.
    ///
    /// The whole batch is rejected before any removal if one id is not
    /// accessible; afterwards a workload or record failure aborts the rest.
    pub async fn delete(&self, ids: &[String], caller: &Caller) -> ControlPlaneResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let owner = match &self.permissions {
            Some(permissions) => {
                if !permissions
                    .can_all(&caller.token, ids, Permission::Administrate)
                    .await?
                {
                    return Err(ControlPlaneError::InstanceNotFound(ids.join(",")));
                }
                None
            }
            None => Some(caller.user_id.as_str()),
        };

        let (instances, all_exist) = bounded(
            self.call_timeout(),
            "store.get_many",
            self.store.get_many(ids, owner),
        )
        .await?;
        if !all_exist {
            return Err(ControlPlaneError::InstanceNotFound(ids.join(",")));
        }

        for instance in instances {
            let result = bounded(
                self.call_timeout(),
                "backend.remove",
                remove_if_present(self.backend.as_ref(), &instance.service_id),
            )
            .await;
            self.track("remove", &result);
            result.inspect_err(|e| {
                error!(call = "backend.remove", instance_id = %instance.id, error = %e, "Workload removal failed")
            })?;

            bounded(
                self.call_timeout(),
                "store.delete_many",
                self.store.delete_many(std::slice::from_ref(&instance.id), owner),
            )
            .await
            .inspect_err(|e| {
                error!(call = "store.delete_many", instance_id = %instance.id, error = %e, "Record removal failed")
            })?;

            if let Some(permissions) = &self.permissions {
                if let Err(e) = permissions.revoke(&caller.token, &instance.id).await {
                    warn!(call = "permissions.remove_resource", instance_id = %instance.id, error = %e, "Permission entry left behind");
                }
            }
            info!(instance_id = %instance.id, "Instance deleted successfully");
        }
        self.note_instance_count().await;
        Ok(())
    }
}
