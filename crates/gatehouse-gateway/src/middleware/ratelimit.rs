//! Per-caller admission control.
//!
//! Runs after authentication so authenticated callers are counted by user id
//! rather than address. Each response carries the window headers; a rejected
//! request gets a 429 envelope with a retry hint instead of reaching the
//! proxy.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use gatehouse_core::{CorrelationId, ErrorCode, RateLimitDecision};
use serde_json::json;

use crate::error::error_response_with_details;
use crate::middleware::AuthContext;
use crate::state::AppState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let identity = caller_identity(&req);
    let endpoint = endpoint_key(req.uri().path());
    let decision = state.limiter.check(&identity, &endpoint).await;

    if !decision.allowed {
        let correlation_id = req.extensions().get::<CorrelationId>().cloned();
        let retry_after = decision.retry_after_secs();
        let mut response = error_response_with_details(
            ErrorCode::RateLimitExceeded,
            "Too many requests, please try again later",
            json!({ "retryAfter": retry_after }),
            correlation_id,
        );
        apply_window_headers(&mut response, &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(req).await;
    apply_window_headers(&mut response, &decision);
    response
}

fn apply_window_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

/// User id when authenticated, otherwise the nearest client address.
fn caller_identity(req: &Request) -> String {
    if let Some(auth) = req.extensions().get::<AuthContext>() {
        return auth.user_id.clone();
    }
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Collapse the path to its route prefix so requests for individual
/// resources share one window.
fn endpoint_key(path: &str) -> String {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    match (segments.next(), segments.next()) {
        (Some(first), Some(second)) => format!("/{first}/{second}"),
        (Some(first), None) => format!("/{first}"),
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn endpoint_key_keeps_the_route_prefix() {
        assert_eq!(endpoint_key("/api/billing/invoices/42"), "/api/billing");
        assert_eq!(endpoint_key("/api/members"), "/api/members");
        assert_eq!(endpoint_key("/health"), "/health");
        assert_eq!(endpoint_key("/"), "/");
    }

    #[test]
    fn identity_prefers_the_authenticated_user() {
        let mut req = HttpRequest::get("/api/members")
            .header("x-forwarded-for", "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(AuthContext {
            user_id: "user-5".to_string(),
            user_type: None,
        });
        assert_eq!(caller_identity(&req), "user-5");
    }

    #[test]
    fn identity_falls_back_to_the_first_forwarded_hop() {
        let req = HttpRequest::get("/api/members")
            .header("x-forwarded-for", "10.0.0.9, 172.16.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(caller_identity(&req), "10.0.0.9");
    }

    #[test]
    fn identity_uses_the_socket_address_last() {
        let mut req = HttpRequest::get("/api/members").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 55001))));
        assert_eq!(caller_identity(&req), "192.168.1.20");
    }

    #[test]
    fn unknown_identity_when_nothing_is_available() {
        let req = HttpRequest::get("/api/members").body(Body::empty()).unwrap();
        assert_eq!(caller_identity(&req), "unknown");
    }
}
