use crate::features::permissions::repo::{
    Permission, PermissionGateway, PermissionsMap, ResourcePermissions, Topic,
};
use crate::shared::error::ControlPlaneResult;
use crate::shared::timeout::bounded;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Permission topic that holds one resource per export instance.
pub const TOPIC: &str = "kafka2mqtt";

/// Role granted full rights on every instance.
pub const ADMIN_ROLE: &str = "admin";

/// Instance-level access control on top of a [`PermissionGateway`].
pub struct PermissionService {
    gateway: Arc<dyn PermissionGateway>,
    admin_token: String,
    call_timeout: Duration,
}

impl PermissionService {
    pub fn new(
        gateway: Arc<dyn PermissionGateway>,
        admin_token: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            admin_token: admin_token.into(),
            call_timeout,
        }
    }

    fn owner_and_admin(owner: &str) -> ResourcePermissions {
        ResourcePermissions {
            user_permissions: HashMap::from([(owner.to_string(), PermissionsMap::full())]),
            role_permissions: HashMap::from([(ADMIN_ROLE.to_string(), PermissionsMap::full())]),
        }
    }

    /// Grants `owner` and the admin role full rights on `id`.
    pub async fn grant_full(&self, token: &str, id: &str, owner: &str) -> ControlPlaneResult<()> {
        let permissions = Self::owner_and_admin(owner);
        bounded(
            self.call_timeout,
            "permissions.set_permission",
            self.gateway.set_permission(token, TOPIC, id, &permissions),
        )
        .await
    }

    /// Same as [`grant_full`](Self::grant_full) with the admin token.
    pub async fn admin_grant_full(&self, id: &str, owner: &str) -> ControlPlaneResult<()> {
        self.grant_full(&self.admin_token, id, owner).await
    }

    pub async fn can(&self, token: &str, id: &str, permission: Permission) -> ControlPlaneResult<bool> {
        bounded(
            self.call_timeout,
            "permissions.check_permission",
            self.gateway.check_permission(token, TOPIC, id, permission),
        )
        .await
    }

    /// True only if every id is granted; ids absent from the answer count as denied.
    pub async fn can_all(
        &self,
        token: &str,
        ids: &[String],
        permission: Permission,
    ) -> ControlPlaneResult<bool> {
        let access = bounded(
            self.call_timeout,
            "permissions.check_multiple_permissions",
            self.gateway
                .check_multiple_permissions(token, TOPIC, ids, permission),
        )
        .await?;
        Ok(ids
            .iter()
            .all(|id| access.get(id).copied().unwrap_or(false)))
    }

    pub async fn accessible_ids(
        &self,
        token: &str,
        permission: Permission,
    ) -> ControlPlaneResult<Vec<String>> {
        bounded(
            self.call_timeout,
            "permissions.list_accessible_resource_ids",
            self.gateway
                .list_accessible_resource_ids(token, TOPIC, permission),
        )
        .await
    }

    pub async fn revoke(&self, token: &str, id: &str) -> ControlPlaneResult<()> {
        bounded(
            self.call_timeout,
            "permissions.remove_resource",
            self.gateway.remove_resource(token, TOPIC, id),
        )
        .await
    }

    pub async fn admin_revoke(&self, id: &str) -> ControlPlaneResult<()> {
        self.revoke(&self.admin_token, id).await
    }

    /// Creates or refreshes the instance topic with admin-role defaults.
    pub async fn ensure_topic(&self) -> ControlPlaneResult<()> {
        let topic = Topic {
            id: TOPIC.to_string(),
            default_permissions: ResourcePermissions {
                user_permissions: HashMap::new(),
                role_permissions: HashMap::from([(
                    ADMIN_ROLE.to_string(),
                    PermissionsMap::full(),
                )]),
            },
        };
        debug!(topic = TOPIC, "Ensuring permission topic");
        bounded(
            self.call_timeout,
            "permissions.set_topic",
            self.gateway.set_topic(&self.admin_token, &topic),
        )
        .await
    }

    pub async fn has_resource(&self, id: &str) -> ControlPlaneResult<bool> {
        let resource = bounded(
            self.call_timeout,
            "permissions.get_resource",
            self.gateway.get_resource(&self.admin_token, TOPIC, id),
        )
        .await?;
        Ok(resource.is_some())
    }

    pub async fn all_resource_ids(&self) -> ControlPlaneResult<Vec<String>> {
        bounded(
            self.call_timeout,
            "permissions.admin_list_resource_ids",
            self.gateway.admin_list_resource_ids(&self.admin_token, TOPIC),
        )
        .await
    }

    /// Read access to an arbitrary topic, used for device existence probes.
    pub async fn can_read_in(&self, token: &str, topic: &str, id: &str) -> ControlPlaneResult<bool> {
        bounded(
            self.call_timeout,
            "permissions.check_permission",
            self.gateway
                .check_permission(token, topic, id, Permission::Read),
        )
        .await
    }
}
