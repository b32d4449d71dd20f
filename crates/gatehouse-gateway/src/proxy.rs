//! Reverse proxy for `/api` traffic.
//!
//! Each request is matched against the route table (longest prefix wins),
//! gated on the target service's health and breaker, then forwarded with the
//! path rewritten and tracing headers attached. Upstream failures feed the
//! service's breaker and come back to the caller as enveloped 502s, or 503s
//! when the failure is what opened the circuit.
//!
//! Upstream 2xx/3xx/4xx responses pass through byte for byte; their bodies
//! belong to the owning service. A 5xx is treated the same as a transport
//! failure so a struggling upstream trips the breaker instead of leaking
//! stack traces through the gateway.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use gatehouse_core::{BreakerState, CorrelationId, ErrorCode, ServiceName, CORRELATION_HEADER};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{error_response, error_response_with_details};
use crate::state::AppState;

pub const GATEWAY_SERVICE_HEADER: &str = "x-gateway-service";
pub const GATEWAY_VERSION_HEADER: &str = "x-gateway-version";
pub const GATEWAY_RESPONSE_TIME_HEADER: &str = "x-gateway-response-time";

/// Headers that describe the client connection rather than the request.
/// They never travel across the proxy in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// One prefix-to-service mapping. `rewrite` replaces the matched prefix on
/// the upstream path.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub prefix: &'static str,
    pub service: ServiceName,
    rewrite: &'static str,
}

pub const ROUTES: &[Route] = &[
    Route { prefix: "/api/auth", service: ServiceName::Core, rewrite: "/auth" },
    Route { prefix: "/api/users", service: ServiceName::Core, rewrite: "/users" },
    Route { prefix: "/api/members", service: ServiceName::Insurance, rewrite: "/members" },
    Route { prefix: "/api/schemes", service: ServiceName::Insurance, rewrite: "/schemes" },
    Route { prefix: "/api/contracts", service: ServiceName::Insurance, rewrite: "/contracts" },
    Route { prefix: "/api/institutions", service: ServiceName::Hospital, rewrite: "/institutions" },
    Route { prefix: "/api/billing", service: ServiceName::Billing, rewrite: "" },
    Route { prefix: "/api/claims", service: ServiceName::Claims, rewrite: "" },
    Route { prefix: "/api/payments", service: ServiceName::Payment, rewrite: "/payments" },
    Route { prefix: "/api/payments/callbacks", service: ServiceName::Payment, rewrite: "/webhooks/callbacks" },
];

/// Longest matching prefix wins, so `/api/payments/callbacks` beats
/// `/api/payments`.
pub fn route_for(path: &str) -> Option<&'static Route> {
    ROUTES
        .iter()
        .filter(|route| {
            path == route.prefix
                || path
                    .strip_prefix(route.prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|route| route.prefix.len())
}

fn rewrite_path(route: &Route, path: &str, query: Option<&str>) -> String {
    let rest = &path[route.prefix.len()..];
    let mut rewritten = format!("{}{}", route.rewrite, rest);
    if rewritten.is_empty() {
        rewritten.push('/');
    }
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    rewritten
}

struct UpstreamReply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

pub async fn forward(State(state): State<AppState>, req: Request) -> Response {
    let correlation_id = req.extensions().get::<CorrelationId>().cloned();
    let path = req.uri().path().to_string();

    let Some(route) = route_for(&path) else {
        return error_response(
            ErrorCode::NotFound,
            format!("No route for {path}"),
            correlation_id,
        );
    };
    let service = route.service;

    // Health gate. An unavailable service is rejected here without any
    // upstream traffic; the breaker's lazy recovery check inside this call
    // is what lets a waited-out circuit admit its trial request.
    let base = match state.registry.service_url(service) {
        Ok(base) => base,
        Err(err) => {
            debug!(service = %service, error = %err, "rejecting request while unavailable");
            return error_response(
                ErrorCode::ServiceUnavailable,
                format!("{service} service is temporarily unavailable"),
                correlation_id,
            );
        }
    };
    let target = format!(
        "{}{}",
        base.trim_end_matches('/'),
        rewrite_path(route, &path, req.uri().query())
    );

    let method = req.method().clone();
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let (parts, body) = req.into_parts();
    // The body is buffered here rather than streamed, so the configured cap
    // is enforced at this read. Raw requests never pass through limit-aware
    // extractors.
    let body = match to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(
                service = %service,
                limit_bytes = state.body_limit,
                error = %err,
                "request body rejected"
            );
            return error_response(
                ErrorCode::PayloadTooLarge,
                "Request body too large",
                correlation_id,
            );
        }
    };
    let headers = forward_headers(&parts.headers, correlation_id.as_ref(), client_ip.as_deref());

    debug!(service = %service, %target, "forwarding request");
    let started = Instant::now();
    let exchange = exchange(&state, method, &target, headers, body);
    match tokio::time::timeout(state.hard_timeout, exchange).await {
        Ok(Ok(reply)) if reply.status.is_server_error() => {
            state.registry.record_failure(service);
            warn!(
                service = %service,
                status = reply.status.as_u16(),
                "upstream replied with a server error"
            );
            failure_response(
                &state,
                service,
                Some(format!("upstream status {}", reply.status.as_u16())),
                correlation_id,
            )
        }
        Ok(Ok(reply)) => {
            state.registry.record_success(service);
            passthrough_response(reply, service, started)
        }
        Ok(Err(err)) => {
            state.registry.record_failure(service);
            warn!(service = %service, error = %err, "forwarding failed");
            failure_response(&state, service, Some(err.to_string()), correlation_id)
        }
        Err(_) => {
            state.registry.record_failure(service);
            warn!(
                service = %service,
                limit_secs = state.hard_timeout.as_secs(),
                "upstream exchange hit the hard timeout"
            );
            failure_response(
                &state,
                service,
                Some("upstream exchange timed out".to_string()),
                correlation_id,
            )
        }
    }
}

/// Send the request and buffer the reply. The per-service soft timeout is
/// carried by the request itself; the caller wraps the whole exchange in the
/// hard timeout.
async fn exchange(
    state: &AppState,
    method: Method,
    target: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamReply, reqwest::Error> {
    let upstream = state
        .http
        .request(method, target)
        .headers(headers)
        .body(body)
        .timeout(state.soft_timeout)
        .send()
        .await?;
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let body = upstream.bytes().await?;
    Ok(UpstreamReply { status, headers, body })
}

/// Copy request headers for the upstream hop: hop-by-hop and host headers
/// go, tracing and forwarding headers come in. `Authorization` passes
/// through untouched.
fn forward_headers(
    inbound: &HeaderMap,
    correlation_id: Option<&CorrelationId>,
    client_ip: Option<&str>,
) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    // Recomputed from the buffered body on send.
    headers.remove(header::CONTENT_LENGTH);

    if let Some(id) = correlation_id {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            headers.insert(CORRELATION_HEADER, value);
        }
    }
    headers.insert(
        GATEWAY_VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );

    if let Some(ip) = client_ip {
        let chain = match inbound
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert("x-forwarded-for", value);
        }
    }
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Some(host) = inbound.get(header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
    headers
}

/// Hand the upstream reply back with the gateway's own markers added.
fn passthrough_response(reply: UpstreamReply, service: ServiceName, started: Instant) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    *response.headers_mut() = reply.headers;

    let headers = response.headers_mut();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.insert(
        GATEWAY_SERVICE_HEADER,
        HeaderValue::from_static(service.as_str()),
    );
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms}ms")) {
        headers.insert(GATEWAY_RESPONSE_TIME_HEADER, value);
    }
    response
}

/// 502 for an upstream failure, or 503 when that failure is what opened the
/// breaker. The cause detail is only exposed in development deployments.
fn failure_response(
    state: &AppState,
    service: ServiceName,
    detail: Option<String>,
    correlation_id: Option<CorrelationId>,
) -> Response {
    let newly_open = state
        .registry
        .breaker(service)
        .map(|breaker| breaker.state() == BreakerState::Open)
        .unwrap_or(false);
    let (code, message) = if newly_open {
        (
            ErrorCode::ServiceUnavailable,
            format!("{service} service is temporarily unavailable"),
        )
    } else {
        (
            ErrorCode::BadGateway,
            format!("Bad response from {service} service"),
        )
    };
    match detail.filter(|_| state.expose_error_detail) {
        Some(cause) => error_response_with_details(
            code,
            message,
            json!({ "cause": cause }),
            correlation_id,
        ),
        None => error_response(code, message, correlation_id),
    }
}
