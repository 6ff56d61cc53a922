use crate::features::instance_management::service::InstanceService;
use crate::shared::types::{Caller, Instance, InstanceList, ListInstancesRequest};
use k2m_core::ErrorResponse;
use std::sync::Arc;
use tracing::info;

/// Controller for instance management API endpoints
pub struct InstanceController {
    service: Arc<InstanceService>,
}

impl InstanceController {
    pub fn new(service: Arc<InstanceService>) -> Self {
        Self { service }
    }

    /// Handle list instances request
    pub async fn list_instances(
        &self,
        caller: &Caller,
        request: ListInstancesRequest,
    ) -> Result<InstanceList, ErrorResponse> {
        info!(user_id = %caller.user_id, limit = request.limit, offset = request.offset, "Received list instances request");

        self.service
            .list(caller, &request)
            .await
            .map_err(|e| e.into())
    }

    /// Handle read instance request
    pub async fn read_instance(&self, id: &str, caller: &Caller) -> Result<Instance, ErrorResponse> {
        info!(instance_id = %id, user_id = %caller.user_id, "Received read instance request");

        self.service.read(id, caller).await.map_err(|e| e.into())
    }

    /// Handle create instance request
    /// Thin wrapper that delegates to service
    pub async fn create_instance(
        &self,
        instance: Instance,
        caller: &Caller,
    ) -> Result<Instance, ErrorResponse> {
        info!(user_id = %caller.user_id, name = %instance.name, "Received create instance request");

        self.service
            .create(instance, caller)
            .await
            .map_err(|e| e.into())
    }

    /// Handle update instance request
    pub async fn update_instance(
        &self,
        instance: Instance,
        caller: &Caller,
    ) -> Result<(), ErrorResponse> {
        info!(instance_id = %instance.id, user_id = %caller.user_id, "Received update instance request");

        self.service
            .update(instance, caller)
            .await
            .map_err(|e| e.into())
    }

    /// Handle delete instances request
    pub async fn delete_instances(
        &self,
        ids: &[String],
        caller: &Caller,
    ) -> Result<(), ErrorResponse> {
        info!(count = ids.len(), user_id = %caller.user_id, "Received delete instances request");

        self.service.delete(ids, caller).await.map_err(|e| e.into())
    }
}
