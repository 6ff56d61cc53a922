use crate::features::instance_management::repo::InstanceQuery;
use crate::features::instance_management::service::InstanceService;
use crate::shared::error::ControlPlaneResult;
use crate::shared::timeout::bounded;
use crate::shared::types::{
    Caller, Instance, PermissionSyncReport, ReconciliationReport, DEFAULT_PAGE_SIZE,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Brings workloads and permission entries back in line with the store.
pub struct ReconciliationService {
    instances: Arc<InstanceService>,
    batch_size: usize,
    call_timeout: Duration,
}

impl ReconciliationService {
    pub fn new(instances: Arc<InstanceService>, call_timeout: Duration) -> Self {
        Self {
            instances,
            batch_size: DEFAULT_PAGE_SIZE,
            call_timeout,
        }
    }

    async fn page(&self, offset: usize) -> ControlPlaneResult<Vec<Instance>> {
        let query = InstanceQuery::page(self.batch_size, offset);
        let (instances, _) = bounded(
            self.call_timeout,
            "store.list",
            self.instances.store().list(&query),
        )
        .await?;
        Ok(instances)
    }

    /// Recreates the workload of every instance whose workload is gone.
    ///
    /// Stops at the first store or backend error.
    pub async fn ensure_all_deployed(&self) -> ControlPlaneResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        let mut offset = 0;

        loop {
            let batch = self.page(offset).await?;
            let batch_len = batch.len();
            offset += batch_len;

            for mut instance in batch {
                report.checked += 1;
                if self.instances.workload_exists(&instance.service_id).await? {
                    info!(instance_id = %instance.id, service_id = %instance.service_id, "Workload still exists");
                    continue;
                }

                info!(instance_id = %instance.id, "Recreating workload");
                let caller = Caller::new(instance.user_id.clone(), "");
                instance.service_id = self.instances.provision(&instance, &caller, false).await?;
                bounded(
                    self.call_timeout,
                    "store.put",
                    self.instances.store().put(instance),
                )
                .await?;
                report.recreated += 1;
            }

            if batch_len < self.batch_size {
                break;
            }
        }

        info!(checked = report.checked, recreated = report.recreated, "Workload reconciliation finished");
        Ok(report)
    }

    /// Grants missing permission entries and drops entries of deleted instances.
    ///
    /// A no-op without permission integration.
    pub async fn sync_permissions(&self) -> ControlPlaneResult<PermissionSyncReport> {
        let mut report = PermissionSyncReport::default();
        let Some(permissions) = self.instances.permissions() else {
            return Ok(report);
        };

        permissions.ensure_topic().await?;

        let mut stored_ids = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self.page(offset).await?;
            let batch_len = batch.len();
            offset += batch_len;

            for instance in batch {
                if !permissions.has_resource(&instance.id).await? {
                    info!(instance_id = %instance.id, user_id = %instance.user_id, "Granting missing permission entry");
                    permissions
                        .admin_grant_full(&instance.id, &instance.user_id)
                        .await?;
                    report.granted += 1;
                }
                stored_ids.push(instance.id);
            }

            if batch_len < self.batch_size {
                break;
            }
        }

        stored_ids.sort();
        for id in permissions.all_resource_ids().await? {
            if stored_ids.binary_search(&id).is_err() {
                warn!(instance_id = %id, "Removing permission entry of unknown instance");
                permissions.admin_revoke(&id).await?;
                report.removed += 1;
            }
        }

        info!(granted = report.granted, removed = report.removed, "Permission reconciliation finished");
        Ok(report)
    }
}
