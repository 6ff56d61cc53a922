use super::{Permission, PermissionGateway, Resource, ResourcePermissions, Topic};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Permission service client speaking the v2 REST API.
pub struct HttpPermissionGateway {
    client: Client,
    base_url: String,
}

impl HttpPermissionGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ControlPlaneResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::PermissionServiceError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> ControlPlaneResult<Response> {
        request
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::PermissionServiceError(e.to_string()))
    }

    async fn expect_success(response: Response) -> ControlPlaneResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ControlPlaneError::PermissionServiceError(format!(
            "unexpected status {status}: {body}"
        )))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ControlPlaneResult<T> {
        Self::expect_success(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ControlPlaneError::PermissionServiceError(e.to_string()))
    }
}

#[async_trait]
impl PermissionGateway for HttpPermissionGateway {
    async fn set_topic(&self, token: &str, topic: &Topic) -> ControlPlaneResult<()> {
        let request = self
            .client
            .put(self.url(&format!("admin/topics/{}", topic.id)))
            .json(topic);
        Self::expect_success(self.send(request, token).await?).await?;
        Ok(())
    }

    async fn get_resource(
        &self,
        token: &str,
        topic: &str,
        id: &str,
    ) -> ControlPlaneResult<Option<Resource>> {
        let request = self.client.get(self.url(&format!("manage/{topic}/{id}")));
        let response = self.send(request, token).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(None),
            _ => Self::decode(response).await.map(Some),
        }
    }

    async fn set_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> ControlPlaneResult<()> {
        debug!(topic, id, "Setting resource permissions");
        let request = self
            .client
            .put(self.url(&format!("manage/{topic}/{id}")))
            .json(permissions);
        Self::expect_success(self.send(request, token).await?).await?;
        Ok(())
    }

    async fn remove_resource(&self, token: &str, topic: &str, id: &str) -> ControlPlaneResult<()> {
        let request = self.client.delete(self.url(&format!("manage/{topic}/{id}")));
        let response = self.send(request, token).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn check_permission(
        &self,
        token: &str,
        topic: &str,
        id: &str,
        permission: Permission,
    ) -> ControlPlaneResult<bool> {
        let request = self
            .client
            .get(self.url(&format!("check/{topic}/{id}")))
            .query(&[("permissions", permission.as_query())]);
        let response = self.send(request, token).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(false),
            _ => Self::decode(response).await,
        }
    }

    async fn check_multiple_permissions(
        &self,
        token: &str,
        topic: &str,
        ids: &[String],
        permission: Permission,
    ) -> ControlPlaneResult<HashMap<String, bool>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let request = self
            .client
            .get(self.url(&format!("check/{topic}")))
            .query(&[
                ("ids", ids.join(",")),
                ("permissions", permission.as_query().to_string()),
            ]);
        Self::decode(self.send(request, token).await?).await
    }

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic: &str,
        permission: Permission,
    ) -> ControlPlaneResult<Vec<String>> {
        let request = self
            .client
            .get(self.url(&format!("accessible/{topic}")))
            .query(&[("permissions", permission.as_query())]);
        Self::decode(self.send(request, token).await?).await
    }

    async fn admin_list_resource_ids(
        &self,
        token: &str,
        topic: &str,
    ) -> ControlPlaneResult<Vec<String>> {
        let request = self
            .client
            .get(self.url(&format!("admin/resource-ids/{topic}")));
        Self::decode(self.send(request, token).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::testing::serve;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};

    const TOKEN: &str = "token";

    fn scripted_status(id: &str) -> Option<StatusCode> {
        match id {
            "forbidden" => Some(StatusCode::FORBIDDEN),
            "missing" => Some(StatusCode::NOT_FOUND),
            "broken" => Some(StatusCode::INTERNAL_SERVER_ERROR),
            _ => None,
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .is_some_and(|v| v.as_bytes() == TOKEN.as_bytes())
    }

    async fn check(
        headers: HeaderMap,
        Path((_, id)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if let Some(status) = scripted_status(&id) {
            return status.into_response();
        }
        let granted = id == "allowed" && query.get("permissions").map(String::as_str) == Some("w");
        Json(granted).into_response()
    }

    async fn check_many(Query(query): Query<HashMap<String, String>>) -> Json<HashMap<String, bool>> {
        let ids = query.get("ids").cloned().unwrap_or_default();
        Json(
            ids.split(',')
                .map(|id| (id.to_string(), id != "denied"))
                .collect(),
        )
    }

    async fn read_resource(Path((topic, id)): Path<(String, String)>) -> Response {
        if let Some(status) = scripted_status(&id) {
            return status.into_response();
        }
        Json(Resource {
            id,
            topic_id: topic,
            permissions: ResourcePermissions::default(),
        })
        .into_response()
    }

    async fn delete_resource(Path((_, id)): Path<(String, String)>) -> StatusCode {
        scripted_status(&id).unwrap_or(StatusCode::OK)
    }

    async fn accessible(Query(query): Query<HashMap<String, String>>) -> Response {
        if query.get("permissions").map(String::as_str) != Some("r") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        Json(vec!["a".to_string(), "b".to_string()]).into_response()
    }

    async fn local_gateway() -> HttpPermissionGateway {
        let router = Router::new()
            .route("/check/:topic/:id", get(check))
            .route("/check/:topic", get(check_many))
            .route("/manage/:topic/:id", get(read_resource).delete(delete_resource))
            .route("/accessible/:topic", get(accessible));
        HttpPermissionGateway::new(serve(router).await, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_check_permission_status_mapping() {
        let gateway = local_gateway().await;
        for (id, expected) in [
            ("allowed", true),
            ("denied", false),
            ("forbidden", false),
            ("missing", false),
        ] {
            let granted = gateway
                .check_permission(TOKEN, "kafka2mqtt", id, Permission::Write)
                .await
                .unwrap();
            assert_eq!(granted, expected, "{id}");
        }

        let err = gateway
            .check_permission(TOKEN, "kafka2mqtt", "broken", Permission::Write)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_SERVICE_ERROR");

        let err = gateway
            .check_permission("other", "kafka2mqtt", "allowed", Permission::Write)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_SERVICE_ERROR");
    }

    #[tokio::test]
    async fn test_get_resource_status_mapping() {
        let gateway = local_gateway().await;
        let resource = gateway
            .get_resource(TOKEN, "kafka2mqtt", "i-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resource.id, "i-1");
        assert_eq!(resource.topic_id, "kafka2mqtt");

        for id in ["forbidden", "missing"] {
            assert!(gateway
                .get_resource(TOKEN, "kafka2mqtt", id)
                .await
                .unwrap()
                .is_none());
        }
        assert!(gateway
            .get_resource(TOKEN, "kafka2mqtt", "broken")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_resource_tolerates_missing_entry() {
        let gateway = local_gateway().await;
        gateway
            .remove_resource(TOKEN, "kafka2mqtt", "i-1")
            .await
            .unwrap();
        gateway
            .remove_resource(TOKEN, "kafka2mqtt", "missing")
            .await
            .unwrap();
        for id in ["forbidden", "broken"] {
            let err = gateway
                .remove_resource(TOKEN, "kafka2mqtt", id)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "PERMISSION_SERVICE_ERROR");
        }
    }

    #[tokio::test]
    async fn test_batch_check_and_accessible_ids() {
        let gateway = local_gateway().await;
        let access = gateway
            .check_multiple_permissions(
                TOKEN,
                "kafka2mqtt",
                &["a".to_string(), "denied".to_string()],
                Permission::Administrate,
            )
            .await
            .unwrap();
        assert_eq!(access.get("a"), Some(&true));
        assert_eq!(access.get("denied"), Some(&false));

        let ids = gateway
            .list_accessible_resource_ids(TOKEN, "kafka2mqtt", Permission::Read)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(gateway
            .list_accessible_resource_ids(TOKEN, "kafka2mqtt", Permission::Write)
            .await
            .is_err());
    }

    #[test]
    fn test_url_joining() {
        let gateway =
            HttpPermissionGateway::new("http://permissions:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            gateway.url("/manage/kafka2mqtt/i-1"),
            "http://permissions:8080/manage/kafka2mqtt/i-1"
        );
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_permission_error() {
        let gateway =
            HttpPermissionGateway::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = gateway
            .check_permission("token", "kafka2mqtt", "i-1", Permission::Read)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_SERVICE_ERROR");
    }
}
