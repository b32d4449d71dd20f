//! Health and service catalog endpoints.
//!
//! `/health` and `/services` are public monitoring surfaces; the admin
//! variant sits under `/api` and therefore behind authentication. All of
//! them read registry snapshots only, so polling them never drives breaker
//! transitions.

use axum::extract::State;
use axum::http::Extensions;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use gatehouse_core::{CorrelationId, Envelope, ErrorCode};
use serde_json::json;

use crate::error::error_response;
use crate::middleware::AuthContext;
use crate::state::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(gateway_health))
        .route("/services", get(service_catalog))
}

/// Routes mounted inside the authenticated `/api` router.
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/api/admin/services/health", get(admin_service_health))
}

fn correlation(extensions: &Extensions) -> Option<CorrelationId> {
    extensions.get::<CorrelationId>().cloned()
}

/// Gateway liveness plus a coarse per-service availability map.
async fn gateway_health(
    State(state): State<AppState>,
    extensions: Extensions,
) -> Response {
    let services: serde_json::Map<String, serde_json::Value> = state
        .registry
        .health_snapshot()
        .into_iter()
        .map(|(name, health)| {
            let available = health.healthy && !health.circuit_breaker_open;
            (name.as_str().to_string(), json!(available))
        })
        .collect();

    let mut envelope = Envelope::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "services": services,
    }));
    if let Some(id) = correlation(&extensions) {
        envelope = envelope.with_correlation(id);
    }
    Json(envelope).into_response()
}

/// Full per-service health detail for monitoring dashboards.
async fn service_catalog(State(state): State<AppState>, extensions: Extensions) -> Response {
    catalog_response(&state, correlation(&extensions))
}

/// Same catalog, restricted to insurance operators.
async fn admin_service_health(State(state): State<AppState>, extensions: Extensions) -> Response {
    let correlation_id = correlation(&extensions);
    let user_type = extensions
        .get::<AuthContext>()
        .and_then(|auth| auth.user_type.as_deref());
    if user_type != Some("insurance") {
        return error_response(
            ErrorCode::InsufficientPermissions,
            "Insurance operator access required",
            correlation_id,
        );
    }
    catalog_response(&state, correlation_id)
}

fn catalog_response(state: &AppState, correlation_id: Option<CorrelationId>) -> Response {
    match serde_json::to_value(state.registry.health_snapshot()) {
        Ok(services) => {
            let mut envelope = Envelope::success(json!({ "services": services }));
            if let Some(id) = correlation_id {
                envelope = envelope.with_correlation(id);
            }
            Json(envelope).into_response()
        }
        Err(err) => error_response(
            ErrorCode::InternalServerError,
            format!("Failed to serialize service health: {err}"),
            correlation_id,
        ),
    }
}
