//! HTTP API for endpoint management
//!
//! The caller's identity is injected by the authenticating proxy in front of
//! this server through the `X-Caller-*` headers.

use crate::metrics::ServerMetrics;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use registry_api::{
    AccessUpdate, CallerContext, CallerRole, CreateEndpoint, CreatedEndpoint, EndpointId, TeamId,
    TlsFileKind, UpdateEndpoint, UserId,
};
use registry_core::{EndpointCoordinator, RegistryError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
pub const CALLER_TEAMS_HEADER: &str = "x-caller-teams";

pub struct ApiState {
    pub coordinator: Arc<EndpointCoordinator>,
    pub metrics: ServerMetrics,
}

impl ApiState {
    pub fn new(coordinator: Arc<EndpointCoordinator>, metrics: ServerMetrics) -> Self {
        metrics.set_routes(coordinator.routes().route_count());
        Self { coordinator, metrics }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            RegistryError::ManagementDisabled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.is_client_error() {
            debug!("Request rejected: {}", err);
        } else {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

/// Routes served by the API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Health,
    Metrics,
    ListEndpoints,
    CreateEndpoint,
    GetEndpoint(EndpointId),
    UpdateEndpoint(EndpointId),
    DeleteEndpoint(EndpointId),
    SetAccess(EndpointId),
    UploadTls(EndpointId, TlsFileKind),
}

impl Route {
    /// Path template used as the metrics label
    fn label(&self) -> &'static str {
        match self {
            Route::Health => "/healthz",
            Route::Metrics => "/metrics",
            Route::ListEndpoints | Route::CreateEndpoint => "/endpoints",
            Route::GetEndpoint(_) | Route::UpdateEndpoint(_) | Route::DeleteEndpoint(_) => {
                "/endpoints/{id}"
            }
            Route::SetAccess(_) => "/endpoints/{id}/access",
            Route::UploadTls(..) => "/endpoints/{id}/tls/{kind}",
        }
    }

    fn requires_caller(&self) -> bool {
        !matches!(self, Route::Health | Route::Metrics)
    }

    fn requires_administrator(&self) -> bool {
        self.requires_caller() && !matches!(self, Route::ListEndpoints)
    }
}

fn parse_id(segment: &str) -> Result<EndpointId, ApiError> {
    segment
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid endpoint identifier: {}", segment)))
}

fn resolve(method: &Method, path: &str) -> Result<Route, ApiError> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let route = match (method, segments.as_slice()) {
        (&Method::GET, ["healthz"]) => Route::Health,
        (&Method::GET, ["metrics"]) => Route::Metrics,
        (&Method::GET, ["endpoints"]) => Route::ListEndpoints,
        (&Method::POST, ["endpoints"]) => Route::CreateEndpoint,
        (&Method::GET, ["endpoints", id]) => Route::GetEndpoint(parse_id(id)?),
        (&Method::PUT, ["endpoints", id]) => Route::UpdateEndpoint(parse_id(id)?),
        (&Method::DELETE, ["endpoints", id]) => Route::DeleteEndpoint(parse_id(id)?),
        (&Method::PUT, ["endpoints", id, "access"]) => Route::SetAccess(parse_id(id)?),
        (&Method::PUT, ["endpoints", id, "tls", kind]) => {
            let id = parse_id(id)?;
            let kind = kind
                .parse::<TlsFileKind>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            Route::UploadTls(id, kind)
        }
        _ => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("No route for {} {}", method, path),
            ))
        }
    };
    Ok(route)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| ApiError::unauthorized(format!("Invalid {} header", name))),
        None => Ok(None),
    }
}

/// Build the caller context from the identity headers
pub fn caller_from_headers(headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    let user_id = header(headers, CALLER_ID_HEADER)?
        .ok_or_else(|| ApiError::unauthorized("Missing caller identity"))?
        .parse::<u64>()
        .map(UserId)
        .map_err(|_| ApiError::unauthorized("Invalid caller identity"))?;

    let role: CallerRole = header(headers, CALLER_ROLE_HEADER)?
        .ok_or_else(|| ApiError::unauthorized("Missing caller role"))?
        .parse()
        .map_err(|_| ApiError::unauthorized("Invalid caller role"))?;

    let teams = match header(headers, CALLER_TEAMS_HEADER)? {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|team| !team.is_empty())
            .map(|team| team.parse::<u64>().map(TeamId))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ApiError::unauthorized("Invalid caller teams"))?,
        None => Vec::new(),
    };

    Ok(CallerContext { user_id, role, teams })
}

async fn read_body<B>(body: B) -> Result<Bytes, ApiError>
where
    B: Body,
    B::Error: Display,
{
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ApiError::bad_request(format!("Unable to read request body: {}", e)))
}

async fn read_json<T, B>(body: B) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    let bytes = read_body(body).await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::bad_request(format!("Invalid request payload: {}", e)))
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json<T: Serialize>(value: &T) -> Result<Response<Full<Bytes>>, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Unable to encode response: {}", e))
    })?;
    Ok(respond(StatusCode::OK, "application/json", body))
}

fn empty() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::OK;
    response
}

fn error_response(err: &ApiError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "err": err.message }).to_string();
    respond(err.status, "application/json", body)
}

/// Entry point for every request
pub async fn handle_request<B>(
    state: Arc<ApiState>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    let (label, response) = match resolve(&method, &path) {
        Ok(route) => {
            let response = match dispatch(&state, route, req).await {
                Ok(response) => response,
                Err(err) => error_response(&err),
            };
            (route.label(), response)
        }
        Err(err) => ("unmatched", error_response(&err)),
    };

    let status = response.status();
    if status.is_server_error() {
        warn!("{} {} -> {}", method, path, status);
    }
    state
        .metrics
        .observe(method.as_str(), label, status.as_u16(), started.elapsed());

    Ok(response)
}

async fn dispatch<B>(state: &ApiState, route: Route, req: Request<B>) -> Result<Response<Full<Bytes>>, ApiError>
where
    B: Body,
    B::Error: Display,
{
    let caller = if route.requires_caller() {
        Some(caller_from_headers(req.headers())?)
    } else {
        None
    };
    if route.requires_administrator() && !caller.as_ref().is_some_and(|c| c.role.is_administrator()) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Access denied to resource"));
    }

    let coordinator = &state.coordinator;
    let response = match route {
        Route::Health => respond(StatusCode::OK, "text/plain", "OK\n"),
        Route::Metrics => {
            let text = state.metrics.gather().map_err(|e| {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to gather metrics: {}", e))
            })?;
            respond(StatusCode::OK, "text/plain; version=0.0.4", text)
        }
        Route::ListEndpoints => {
            let caller = caller.ok_or_else(|| ApiError::unauthorized("Missing caller identity"))?;
            json(&coordinator.list_visible(&caller).await?)?
        }
        Route::CreateEndpoint => {
            let spec: CreateEndpoint = read_json(req.into_body()).await?;
            let created = coordinator.create(spec).await?;
            json(&CreatedEndpoint { id: created.id })?
        }
        Route::GetEndpoint(id) => json(&coordinator.get(id).await?)?,
        Route::UpdateEndpoint(id) => {
            let spec: UpdateEndpoint = read_json(req.into_body()).await?;
            let result = coordinator.update(id, spec).await;
            state.metrics.set_routes(coordinator.routes().route_count());
            result?;
            empty()
        }
        Route::SetAccess(id) => {
            let access: AccessUpdate = read_json(req.into_body()).await?;
            coordinator.set_access(id, access).await?;
            empty()
        }
        Route::DeleteEndpoint(id) => {
            let result = coordinator.delete(id).await;
            state.metrics.set_routes(coordinator.routes().route_count());
            result?;
            empty()
        }
        Route::UploadTls(id, kind) => {
            let data = read_body(req.into_body()).await?;
            coordinator.upload_tls_file(id, kind, &data).await?;
            empty()
        }
    };
    Ok(response)
}
