//! Gateway error type and enveloped error replies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use gatehouse_core::{CorrelationId, Envelope, ErrorCode};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failures surfaced while building or running the gateway. Per-request
/// failures never use this type; they become enveloped responses directly.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] gatehouse_core::RegistryError),

    #[error("Rate limit store error: {0}")]
    Store(#[from] gatehouse_core::RateLimitError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

/// Enveloped error reply with the status derived from the code.
pub(crate) fn error_response(
    code: ErrorCode,
    message: impl Into<String>,
    correlation_id: Option<CorrelationId>,
) -> Response {
    respond(Envelope::error(code, message), code, correlation_id)
}

/// Same as [`error_response`] with a structured `details` block.
pub(crate) fn error_response_with_details(
    code: ErrorCode,
    message: impl Into<String>,
    details: Value,
    correlation_id: Option<CorrelationId>,
) -> Response {
    respond(
        Envelope::error_with_details(code, message, details),
        code,
        correlation_id,
    )
}

fn respond(mut envelope: Envelope, code: ErrorCode, correlation_id: Option<CorrelationId>) -> Response {
    if let Some(id) = correlation_id {
        envelope = envelope.with_correlation(id);
    }
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(envelope)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_status_follows_the_code() {
        let response = error_response(ErrorCode::ServiceUnavailable, "down", None);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = error_response(ErrorCode::Unauthorized, "who are you", None);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn body_is_an_error_envelope_with_correlation() {
        let id = CorrelationId::from_header("req-9").unwrap();
        let response = error_response(ErrorCode::NotFound, "no such route", Some(id));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "NOT_FOUND");
        assert_eq!(value["correlationId"], "req-9");
    }
}
