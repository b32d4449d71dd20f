//! API documentation endpoints.

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use gatehouse_core::API_VERSION;
use serde_json::{json, Value};

pub fn docs_routes() -> Router {
    Router::new()
        .route("/docs", get(docs_index))
        .route("/api-docs", get(docs_index))
        .route("/swagger.json", get(openapi_document))
}

async fn docs_index() -> Json<Value> {
    Json(json!({
        "name": "Gatehouse API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "apiVersion": API_VERSION,
        "openapi": "/swagger.json",
        "endpoints": {
            "health": "GET /health",
            "services": "GET /services",
            "proxy": "ANY /api/{service-route}",
        },
    }))
}

async fn openapi_document() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Gatehouse API Gateway",
            "description": "Single entry point for the insurance platform. \
                            Requests under /api are authenticated, rate limited, \
                            and proxied to the owning service.",
            "version": API_VERSION,
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Gateway liveness and per-service availability",
                    "responses": { "200": { "description": "Envelope with a service availability map" } }
                }
            },
            "/services": {
                "get": {
                    "summary": "Detailed per-service health snapshots",
                    "responses": { "200": { "description": "Envelope with health detail per service" } }
                }
            },
            "/api/admin/services/health": {
                "get": {
                    "summary": "Health snapshots for insurance operators",
                    "security": [ { "bearerAuth": [] } ],
                    "responses": {
                        "200": { "description": "Envelope with health detail per service" },
                        "401": { "description": "Missing or malformed bearer token" },
                        "403": { "description": "Caller is not an insurance operator" }
                    }
                }
            },
            "/api/{route}": {
                "description": "Proxied to the owning upstream service by longest route prefix",
                "parameters": [
                    { "name": "route", "in": "path", "required": true, "schema": { "type": "string" } }
                ]
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            }
        }
    }))
}
