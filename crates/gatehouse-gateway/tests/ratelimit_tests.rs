//! Rate limiting through the full middleware stack.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use gatehouse_config::{GatewayConfig, ServiceConfig};
use gatehouse_core::HealthChecker;
use gatehouse_gateway::{build_router, state};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bearer_for(user: &str) -> String {
    let head = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({"sub": user}).to_string().as_bytes());
    format!("Bearer {head}.{claims}.sig")
}

async fn core_upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
        .mount(&upstream)
        .await;
    upstream
}

async fn gateway(upstream: &MockServer, max_requests: u32) -> (Router, HealthChecker) {
    let mut config = GatewayConfig::default();
    config.services.insert(
        "core".to_string(),
        ServiceConfig {
            urls: vec![upstream.uri()],
            timeout_ms: 5_000,
            retries: 0,
        },
    );
    config.rate_limit.max_requests = max_requests;
    let (state, checker) = state::build(&config).await.unwrap();
    let app = build_router(state, &config).unwrap();
    (app, checker)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn request_over_the_window_budget_is_throttled() {
    let upstream = core_upstream().await;
    let (app, checker) = gateway(&upstream, 3).await;
    checker.run_round().await;

    let request = || {
        Request::get("/api/users")
            .header(header::AUTHORIZATION, bearer_for("user-9"))
            .body(Body::empty())
            .unwrap()
    };

    for expected_remaining in ["2", "1", "0"] {
        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(
            response.headers().get("x-ratelimit-remaining").unwrap(),
            expected_remaining
        );
    }

    let throttled = app.oneshot(request()).await.unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        throttled.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );
    assert!(throttled.headers().contains_key(header::RETRY_AFTER));
    let reset: i64 = throttled
        .headers()
        .get("x-ratelimit-reset")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(reset > 0);

    let body = json_body(throttled).await;
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    let retry_after = body["error"]["details"]["retryAfter"].as_i64().unwrap();
    assert!((1..=60).contains(&retry_after), "retryAfter = {retry_after}");
}

#[tokio::test]
async fn identities_have_independent_budgets() {
    let upstream = core_upstream().await;
    let (app, checker) = gateway(&upstream, 1).await;
    checker.run_round().await;

    let request = |user: &str| {
        Request::get("/api/users")
            .header(header::AUTHORIZATION, bearer_for(user))
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request("user-a")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request("user-a")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different caller still has a fresh window.
    let other = app.oneshot(request("user-b")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn unauthenticated_callers_are_counted_by_address() {
    let upstream = core_upstream().await;
    let (app, checker) = gateway(&upstream, 1).await;
    checker.run_round().await;
    let app = app.layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))));

    let request = || {
        Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    // A forwarded client address is a distinct identity.
    let forwarded = app
        .oneshot(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "203.0.113.5")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forwarded.status(), StatusCode::OK);
}
