use async_trait::async_trait;
use k2m_core::{CoreError, Result};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Authenticated request channel to an orchestration API.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest transport authenticating every request with basic auth.
pub struct BasicAuthTransport {
    client: Client,
    access_key: String,
    secret_key: String,
}

impl BasicAuthTransport {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        accept_invalid_certs: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| CoreError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl HttpTransport for BasicAuthTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .basic_auth(&self.access_key, Some(&self.secret_key));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("{} {}: {e}", request.method, request.url)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Backend(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse { status, body })
    }
}

/// Joins a base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
