//! REST surface of the control plane.

use crate::features::instance_management::controller::InstanceController;
use crate::features::observability::controller::ObservabilityController;
use crate::shared::types::{Caller, Instance, InstanceList, ListInstancesRequest};
use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use k2m_core::ErrorResponse;
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// User id assumed when a request carries no `X-UserId` header.
pub const DEFAULT_USER_ID: &str = "developer";

pub const USER_ID_HEADER: &str = "X-UserId";

#[derive(Clone)]
pub struct AppState {
    pub instances: Arc<InstanceController>,
    pub observability: Arc<ObservabilityController>,
}

/// HTTP status of an error code.
pub fn status_for(error_code: &str) -> StatusCode {
    match error_code {
        "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
        "INSTANCE_NOT_FOUND" | "UPSTREAM_VERIFICATION_FAILED" => StatusCode::NOT_FOUND,
        "PERMISSION_SERVICE_ERROR" | "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug)]
pub struct ApiError(ErrorResponse);

impl ApiError {
    fn validation(message: impl Into<String>) -> Self {
        Self(ErrorResponse::new("VALIDATION_ERROR", message))
    }
}

impl From<ErrorResponse> for ApiError {
    fn from(error: ErrorResponse) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.0.error_code), Json(self.0)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };

        let token = header_value(header::AUTHORIZATION.as_str()).unwrap_or_default();
        let user_id = header_value(USER_ID_HEADER).unwrap_or_else(|| {
            warn!(path = %parts.uri.path(), "Missing {USER_ID_HEADER} header, using {DEFAULT_USER_ID}");
            DEFAULT_USER_ID.to_string()
        });
        Ok(Caller::new(user_id, token))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    order: Option<String>,
    search: Option<String>,
    generated: Option<String>,
}

impl ListParams {
    fn into_request(self) -> Result<ListInstancesRequest, ApiError> {
        let defaults = ListInstancesRequest::default();
        let request = ListInstancesRequest {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
            search: self.search.filter(|s| !s.is_empty()),
            include_generated: !self
                .generated
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case("false")),
            ..defaults
        };
        match self.order.as_deref().filter(|o| !o.is_empty()) {
            Some(order) => request
                .with_order(order)
                .map_err(|e| ApiError(e.into())),
            None => Ok(request),
        }
    }
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.observability.render_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

async fn list_instances(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<InstanceList>, ApiError> {
    let Query(params) = params?;
    let list = state
        .instances
        .list_instances(&caller, params.into_request()?)
        .await?;
    Ok(Json(list))
}

async fn create_instance(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Instance>, JsonRejection>,
) -> Result<Json<Instance>, ApiError> {
    let Json(instance) = body?;
    let created = state.instances.create_instance(instance, &caller).await?;
    Ok(Json(created))
}

async fn read_instance(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state.instances.read_instance(&id, &caller).await?;
    Ok(Json(instance))
}

async fn update_instance(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Result<Json<Instance>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(instance) = body?;
    if instance.id != id {
        return Err(ApiError::validation("path id does not match body ID"));
    }
    state.instances.update_instance(instance, &caller).await?;
    Ok(StatusCode::OK)
}

async fn delete_instance(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.instances.delete_instances(&[id], &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_instances(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(ids) = body?;
    state.instances.delete_instances(&ids, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| format!("{} {}", request.method(), p.as_str()))
        .unwrap_or_else(|| request.method().to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    state.observability.record_api_request(
        &endpoint,
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub type RouteRegistration = fn(Router<AppState>) -> Router<AppState>;

fn heartbeat_routes(router: Router<AppState>) -> Router<AppState> {
    router.route("/", get(heartbeat))
}

fn metrics_routes(router: Router<AppState>) -> Router<AppState> {
    router.route("/metrics", get(metrics))
}

fn instance_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/instances",
            get(list_instances)
                .post(create_instance)
                .delete(delete_instances),
        )
        .route(
            "/instances/:id",
            get(read_instance)
                .put(update_instance)
                .delete(delete_instance),
        )
}

/// Every route group the server exposes.
pub const ROUTES: &[RouteRegistration] = &[heartbeat_routes, metrics_routes, instance_routes];

pub fn router(state: AppState) -> Router {
    ROUTES
        .iter()
        .fold(Router::new(), |router, register| register(router))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Serving API");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
