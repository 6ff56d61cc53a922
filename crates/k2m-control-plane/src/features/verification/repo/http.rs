use super::ExistenceVerifier;
use crate::features::permissions::service::PermissionService;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Permission topic holding the device resources.
pub const DEVICE_TOPIC: &str = "devices";

#[derive(Debug, Deserialize)]
struct PipelineProbe {
    #[serde(default)]
    id: String,
}

pub struct HttpExistenceVerifier {
    client: Client,
    pipeline_url: String,
    import_url: String,
    permissions: Option<Arc<PermissionService>>,
}

impl HttpExistenceVerifier {
    pub fn new(
        pipeline_url: impl Into<String>,
        import_url: impl Into<String>,
        permissions: Option<Arc<PermissionService>>,
        timeout: Duration,
    ) -> ControlPlaneResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::UpstreamError(e.to_string()))?;
        Ok(Self {
            client,
            pipeline_url: pipeline_url.into().trim_end_matches('/').to_string(),
            import_url: import_url.into().trim_end_matches('/').to_string(),
            permissions,
        })
    }

    async fn get(&self, url: String, token: &str, user_id: &str) -> ControlPlaneResult<reqwest::Response> {
        debug!(url = %url, "Probing upstream resource");
        self.client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .header("X-UserId", user_id)
            .send()
            .await
            .map_err(|e| ControlPlaneError::UpstreamError(e.to_string()))
    }
}

#[async_trait]
impl ExistenceVerifier for HttpExistenceVerifier {
    async fn verify_device(&self, id: &str, token: &str) -> ControlPlaneResult<bool> {
        let permissions = self.permissions.as_ref().ok_or_else(|| {
            ControlPlaneError::UpstreamError("device verification needs the permission service".to_string())
        })?;
        permissions
            .can_read_in(token, DEVICE_TOPIC, id)
            .await
            .map_err(|e| ControlPlaneError::UpstreamError(e.to_string()))
    }

    async fn verify_pipeline(
        &self,
        id: &str,
        token: &str,
        user_id: &str,
    ) -> ControlPlaneResult<bool> {
        let response = self
            .get(format!("{}/pipeline/{id}", self.pipeline_url), token, user_id)
            .await?;
        if response.status() != StatusCode::OK {
            return Ok(false);
        }
        let pipeline: PipelineProbe = response
            .json()
            .await
            .map_err(|e| ControlPlaneError::UpstreamError(e.to_string()))?;
        Ok(!pipeline.id.is_empty())
    }

    async fn verify_import(&self, id: &str, token: &str, user_id: &str) -> ControlPlaneResult<bool> {
        let response = self
            .get(format!("{}/instances/{id}", self.import_url), token, user_id)
            .await?;
        Ok(response.status() == StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::testing::serve;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};

    fn caller_headers_present(headers: &HeaderMap) -> bool {
        headers.get("authorization").is_some_and(|v| v == "token")
            && headers.get("x-userid").is_some_and(|v| v == "user")
    }

    async fn pipeline(headers: HeaderMap, Path(id): Path<String>) -> Response {
        if !caller_headers_present(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match id.as_str() {
            "p-1" => Json(serde_json::json!({ "id": "p-1", "name": "pipe" })).into_response(),
            "unnamed" => Json(serde_json::json!({ "id": "" })).into_response(),
            "broken" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn import(headers: HeaderMap, Path(id): Path<String>) -> StatusCode {
        if !caller_headers_present(&headers) {
            return StatusCode::UNAUTHORIZED;
        }
        match id.as_str() {
            "imp-1" => StatusCode::OK,
            "broken" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        }
    }

    async fn local_verifier() -> HttpExistenceVerifier {
        let router = Router::new()
            .route("/pipeline/:id", get(pipeline))
            .route("/instances/:id", get(import));
        let base = serve(router).await;
        HttpExistenceVerifier::new(&base, &base, None, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_status_mapping() {
        let verifier = local_verifier().await;
        for (id, expected) in [
            ("p-1", true),
            ("unnamed", false),
            ("missing", false),
            ("broken", false),
        ] {
            let exists = verifier.verify_pipeline(id, "token", "user").await.unwrap();
            assert_eq!(exists, expected, "{id}");
        }
        assert!(!verifier
            .verify_pipeline("p-1", "token", "someone-else")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_import_status_mapping() {
        let verifier = local_verifier().await;
        for (id, expected) in [("imp-1", true), ("missing", false), ("broken", false)] {
            let exists = verifier.verify_import(id, "token", "user").await.unwrap();
            assert_eq!(exists, expected, "{id}");
        }
        assert!(!verifier.verify_import("imp-1", "", "user").await.unwrap());
    }

    fn verifier(permissions: Option<Arc<PermissionService>>) -> HttpExistenceVerifier {
        HttpExistenceVerifier::new(
            "http://127.0.0.1:9/",
            "http://127.0.0.1:9",
            permissions,
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_probe_requires_id() {
        let probe: PipelineProbe = serde_json::from_str(r#"{"name":"p"}"#).unwrap();
        assert!(probe.id.is_empty());
        let probe: PipelineProbe = serde_json::from_str(r#"{"id":"p-1"}"#).unwrap();
        assert_eq!(probe.id, "p-1");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_an_upstream_error() {
        let err = verifier(None)
            .verify_import("imp-1", "token", "user")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn test_device_check_without_permission_service_fails() {
        let err = verifier(None)
            .verify_device("dev-1", "token")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn test_device_check_uses_device_topic() {
        use crate::features::permissions::repo::{
            InMemoryPermissionGateway, PermissionGateway, PermissionsMap, ResourcePermissions,
        };
        use std::collections::HashMap;

        let gateway = InMemoryPermissionGateway::new("admin-token");
        gateway.register_token("t-alice", "alice", &[]).await;
        let permissions = ResourcePermissions {
            user_permissions: HashMap::from([("alice".to_string(), PermissionsMap::full())]),
            role_permissions: HashMap::new(),
        };
        gateway
            .set_permission("admin-token", DEVICE_TOPIC, "dev-1", &permissions)
            .await
            .unwrap();
        let service = Arc::new(PermissionService::new(
            Arc::new(gateway),
            "admin-token",
            Duration::from_secs(1),
        ));

        let verifier = verifier(Some(service));
        assert!(verifier.verify_device("dev-1", "t-alice").await.unwrap());
        assert!(!verifier.verify_device("dev-2", "t-alice").await.unwrap());
    }
}
