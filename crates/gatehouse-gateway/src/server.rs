//! Router assembly and server startup.

use std::net::SocketAddr;

use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use gatehouse_config::GatewayConfig;
use gatehouse_core::{CorrelationId, ErrorCode, CORRELATION_HEADER};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::error::error_response;
use crate::middleware::{authenticate, correlation, rate_limit};
use crate::routes::{admin_routes, docs_routes, health_routes};
use crate::state::AppState;
use crate::{proxy, GatewayError, Result};

fn cors_layer(config: &GatewayConfig) -> Result<CorsLayer> {
    let origin = if config.cors.allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::with_capacity(config.cors.allowed_origins.len());
        for raw in &config.cors.allowed_origins {
            let value: HeaderValue = raw
                .parse()
                .map_err(|_| GatewayError::Config(format!("Invalid CORS origin: {raw}")))?;
            origins.push(value);
        }
        AllowOrigin::list(origins)
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CORRELATION_HEADER),
        ]))
}

/// Assemble the full gateway router.
///
/// `/api` traffic runs through authentication and rate limiting before the
/// proxy; the monitoring and docs surfaces sit outside both. Correlation
/// wraps everything so even CORS-passed error replies carry an id.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Result<Router> {
    let cors = cors_layer(config)?;

    let api = admin_routes()
        .route("/api/{*path}", any(proxy::forward))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(authenticate));

    let app = Router::new()
        .merge(health_routes())
        .merge(api)
        .with_state(state)
        .merge(docs_routes())
        .fallback(not_found)
        .layer(from_fn(correlation))
        .layer(cors);

    Ok(app)
}

/// Enveloped 404 for paths outside the routing surface.
async fn not_found(req: Request) -> Response {
    let correlation_id = req.extensions().get::<CorrelationId>().cloned();
    error_response(
        ErrorCode::NotFound,
        format!("No route for {}", req.uri().path()),
        correlation_id,
    )
}

pub async fn start_server(state: AppState, config: &GatewayConfig) -> Result<()> {
    let app = build_router(state, config)?;

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

    info!("Starting gateway on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(GatewayError::Io)?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(GatewayError::Io)?;

    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM (what container runtimes send).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, draining connections");
}
