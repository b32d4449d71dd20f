//! Correlation id and response timing.
//!
//! The outermost request layer. Adopts the caller's correlation id when the
//! header carries a usable one, mints a fresh one otherwise, and makes the id
//! available to every later layer through request extensions. The same layer
//! stamps the id, the API version, and the wall-clock handling time onto the
//! response and writes the one request summary log line.

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use gatehouse_core::{CorrelationId, API_VERSION, CORRELATION_HEADER};
use tracing::info;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time";
pub const API_VERSION_HEADER: &str = "api-version";

pub async fn correlation(mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let id = req
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(CorrelationId::from_header)
        .unwrap_or_default();
    req.extensions_mut().insert(id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let mut response = next.run(req).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        headers.insert(CORRELATION_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms}ms")) {
        headers.insert(RESPONSE_TIME_HEADER, value);
    }
    headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms,
        correlation_id = %id,
        "request handled"
    );
    response
}
