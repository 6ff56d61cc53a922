pub mod http;
#[cfg(test)]
pub(crate) mod testing;

use crate::shared::error::ControlPlaneResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use http::HttpPermissionGateway;
#[cfg(test)]
pub(crate) use testing::InMemoryPermissionGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Execute,
    Administrate,
}

impl Permission {
    /// Single-letter form used in permission service queries.
    pub fn as_query(&self) -> &'static str {
        match self {
            Permission::Read => "r",
            Permission::Write => "w",
            Permission::Execute => "x",
            Permission::Administrate => "a",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsMap {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub administrate: bool,
}

impl PermissionsMap {
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            execute: true,
            administrate: true,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Execute => self.execute,
            Permission::Administrate => self.administrate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    #[serde(default)]
    pub user_permissions: HashMap<String, PermissionsMap>,
    #[serde(default)]
    pub role_permissions: HashMap<String, PermissionsMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub topic_id: String,
    #[serde(flatten)]
    pub permissions: ResourcePermissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub default_permissions: ResourcePermissions,
}

/// Client of the central permission service. Every call names the topic it
/// operates on; `token` is the caller's (or the admin) bearer token.
#[async_trait]
pub trait PermissionGateway: Send + Sync {
    async fn set_topic(&self, token: &str, topic: &Topic) -> ControlPlaneResult<()>;

    /// `Ok(None)` when the resource has no entry.
    async fn get_resource(
        &self,
        token: &str,
        topic: &str,
        id: &str,
    ) -> ControlPlaneResult<Option<Resource>>;

    async fn set_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> ControlPlaneResult<()>;

    async fn remove_resource(&self, token: &str, topic: &str, id: &str) -> ControlPlaneResult<()>;

    async fn check_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permission: Permission,
    ) -> ControlPlaneResult<bool>;

    async fn check_multiple_permissions(
        &self,
        token: &str,
        topic: &str,
        ids: &[String],
        permission: Permission,
    ) -> ControlPlaneResult<HashMap<String, bool>>;

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic: &str,
        permission: Permission,
    ) -> ControlPlaneResult<Vec<String>>;

    async fn admin_list_resource_ids(&self, token: &str, topic: &str)
        -> ControlPlaneResult<Vec<String>>;
}
