use super::{Permission, PermissionGateway, Resource, ResourcePermissions, Topic};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Identity {
    user_id: String,
    roles: Vec<String>,
}

#[derive(Default)]
struct PermissionState {
    topics: HashMap<String, Topic>,
    resources: HashMap<(String, String), ResourcePermissions>,
    identities: HashMap<String, Identity>,
}

/// Process-local permission service. Tokens must be registered with
/// [`InMemoryPermissionGateway::register_token`]; the admin token bypasses
/// every check.
#[derive(Clone)]
pub struct InMemoryPermissionGateway {
    admin_token: String,
    state: Arc<RwLock<PermissionState>>,
}

impl InMemoryPermissionGateway {
    pub fn new(admin_token: impl Into<String>) -> Self {
        Self {
            admin_token: admin_token.into(),
            state: Arc::new(RwLock::new(PermissionState::default())),
        }
    }

    pub async fn register_token(&self, token: &str, user_id: &str, roles: &[&str]) {
        self.state.write().await.identities.insert(
            token.to_string(),
            Identity {
                user_id: user_id.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
    }

    pub async fn topic(&self, topic: &str) -> Option<Topic> {
        self.state.read().await.topics.get(topic).cloned()
    }

    pub async fn resource_ids(&self, topic: &str) -> BTreeSet<String> {
        self.state
            .read()
            .await
            .resources
            .keys()
            .filter(|(t, _)| t == topic)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn is_admin(&self, token: &str) -> bool {
        !self.admin_token.is_empty() && token == self.admin_token
    }

    fn allowed(
        &self,
        state: &PermissionState,
        token: &str,
        topic: &str,
        id: &str,
        permission: Permission,
    ) -> bool {
        if self.is_admin(token) {
            return true;
        }
        let (Some(identity), Some(resource)) = (
            state.identities.get(token),
            state.resources.get(&(topic.to_string(), id.to_string())),
        ) else {
            return false;
        };

        resource
            .user_permissions
            .get(&identity.user_id)
            .is_some_and(|p| p.allows(permission))
            || identity.roles.iter().any(|role| {
                resource
                    .role_permissions
                    .get(role)
                    .is_some_and(|p| p.allows(permission))
            })
    }

    fn require_admin(&self, token: &str) -> ControlPlaneResult<()> {
        if self.is_admin(token) {
            Ok(())
        } else {
            Err(ControlPlaneError::PermissionServiceError(
                "admin token required".to_string(),
            ))
        }
    }
}

#[async_trait]
impl PermissionGateway for InMemoryPermissionGateway {
    async fn set_topic(&self, token: &str, topic: &Topic) -> ControlPlaneResult<()> {
        self.require_admin(token)?;
        self.state
            .write()
            .await
            .topics
            .insert(topic.id.clone(), topic.clone());
        Ok(())
    }

    async fn get_resource(
        &self,
        token: &str,
        topic: &str,
        id: &str,
    ) -> ControlPlaneResult<Option<Resource>> {
        let state = self.state.read().await;
        if !self.allowed(&state, token, topic, id, Permission::Administrate) {
            return Ok(None);
        }
        Ok(state
            .resources
            .get(&(topic.to_string(), id.to_string()))
            .map(|permissions| Resource {
                id: id.to_string(),
                topic_id: topic.to_string(),
                permissions: permissions.clone(),
            }))
    }

    async fn set_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> ControlPlaneResult<()> {
        let mut state = self.state.write().await;
        let key = (topic.to_string(), id.to_string());
        if state.resources.contains_key(&key)
            && !self.allowed(&state, token, topic, id, Permission::Administrate)
        {
            return Err(ControlPlaneError::PermissionServiceError(format!(
                "not allowed to administrate {id}"
            )));
        }
        if !self.is_admin(token) && !state.identities.contains_key(token) {
            return Err(ControlPlaneError::PermissionServiceError(
                "unknown token".to_string(),
            ));
        }
        state.resources.insert(key, permissions.clone());
        Ok(())
    }

    async fn remove_resource(&self, token: &str, topic: &str, id: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.write().await;
        if !self.allowed(&state, token, topic, id, Permission::Administrate) {
            return Err(ControlPlaneError::PermissionServiceError(format!(
                "not allowed to remove {id}"
            )));
        }
        state.resources.remove(&(topic.to_string(), id.to_string()));
        Ok(())
    }

    async fn check_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permission: Permission,
    ) -> ControlPlaneResult<bool> {
        let state = self.state.read().await;
        Ok(self.allowed(&state, token, topic, id, permission))
    }

    async fn check_multiple_permissions(
        &self,
        token: &str,
        topic: &str,
        ids: &[String],
        permission: Permission,
    ) -> ControlPlaneResult<HashMap<String, bool>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .map(|id| (id.clone(), self.allowed(&state, token, topic, id, permission)))
            .collect())
    }

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic: &str,
        permission: Permission,
    ) -> ControlPlaneResult<Vec<String>> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .resources
            .keys()
            .filter(|(t, id)| t == topic && self.allowed(&state, token, topic, id, permission))
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn admin_list_resource_ids(
        &self,
        token: &str,
        topic: &str,
    ) -> ControlPlaneResult<Vec<String>> {
        self.require_admin(token)?;
        Ok(self.resource_ids(topic).await.into_iter().collect())
    }
}

mod tests {
    use super::*;
    use crate::features::permissions::repo::PermissionsMap;

    fn owner_only(user: &str) -> ResourcePermissions {
        ResourcePermissions {
            user_permissions: HashMap::from([(user.to_string(), PermissionsMap::full())]),
            role_permissions: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_owner_and_role_checks() {
        let gateway = InMemoryPermissionGateway::new("admin-token");
        gateway.register_token("t-alice", "alice", &["user"]).await;
        gateway.register_token("t-bob", "bob", &["user"]).await;
        gateway.register_token("t-root", "root", &["admin"]).await;

        let mut permissions = owner_only("alice");
        permissions
            .role_permissions
            .insert("admin".to_string(), PermissionsMap::full());
        gateway
            .set_permission("t-alice", "kafka2mqtt", "i-1", &permissions)
            .await
            .unwrap();

        for (token, expected) in [("t-alice", true), ("t-bob", false), ("t-root", true)] {
            assert_eq!(
                gateway
                    .check_permission(token, "kafka2mqtt", "i-1", Permission::Write)
                    .await
                    .unwrap(),
                expected
            );
        }
        assert!(!gateway
            .check_permission("t-alice", "kafka2mqtt", "i-2", Permission::Read)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_accessible_ids_and_multi_check() {
        let gateway = InMemoryPermissionGateway::new("admin-token");
        gateway.register_token("t-alice", "alice", &[]).await;
        for id in ["b", "a"] {
            gateway
                .set_permission("admin-token", "kafka2mqtt", id, &owner_only("alice"))
                .await
                .unwrap();
        }
        gateway
            .set_permission("admin-token", "kafka2mqtt", "c", &owner_only("bob"))
            .await
            .unwrap();

        let ids = gateway
            .list_accessible_resource_ids("t-alice", "kafka2mqtt", Permission::Read)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let access = gateway
            .check_multiple_permissions(
                "t-alice",
                "kafka2mqtt",
                &["a".to_string(), "c".to_string()],
                Permission::Administrate,
            )
            .await
            .unwrap();
        assert_eq!(access.get("a"), Some(&true));
        assert_eq!(access.get("c"), Some(&false));
    }

    #[tokio::test]
    async fn test_admin_operations_require_admin_token() {
        let gateway = InMemoryPermissionGateway::new("admin-token");
        let topic = Topic {
            id: "kafka2mqtt".to_string(),
            default_permissions: ResourcePermissions::default(),
        };
        assert!(gateway.set_topic("nobody", &topic).await.is_err());
        gateway.set_topic("admin-token", &topic).await.unwrap();
        assert_eq!(gateway.topic("kafka2mqtt").await, Some(topic));

        assert!(gateway
            .admin_list_resource_ids("nobody", "kafka2mqtt")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_resource() {
        let gateway = InMemoryPermissionGateway::new("admin-token");
        gateway.register_token("t-alice", "alice", &[]).await;
        gateway
            .set_permission("t-alice", "kafka2mqtt", "i-1", &owner_only("alice"))
            .await
            .unwrap();
        assert!(gateway
            .get_resource("admin-token", "kafka2mqtt", "i-1")
            .await
            .unwrap()
            .is_some());

        gateway
            .remove_resource("t-alice", "kafka2mqtt", "i-1")
            .await
            .unwrap();
        assert!(gateway.resource_ids("kafka2mqtt").await.is_empty());
    }
}
