//! # Tests for Handlers
//!
//! Router-level tests for the unauthenticated endpoints and the auth guard.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Json,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::handlers::root;
use crate::server::{AppState, create_app};

fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        jwt_secret: Some("handler-tests-secret-handler-tests-secret".to_string()),
        pbkdf2_iterations: 1_000,
        ..Default::default()
    }
}

async fn test_app() -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    create_app(AppState::from_config(test_config(), db).unwrap())
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;
    assert_eq!(service_info.service, "detecktiv");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_health_endpoints_are_not_cached() {
    let app = test_app().await;

    for path in ["/health", "/healthz"] {
        let (status, headers, body) = send(&app, Method::GET, path).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(body["status"], "ok");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    }

    let (status, _, _) = send(&app, Method::HEAD, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_and_db_health() {
    let app = test_app().await;

    for path in ["/readiness", "/ready"] {
        let (status, _, body) = send(&app, Method::GET, path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["db"], true);
        assert_eq!(body["checks"]["companies_house_configured"], false);
    }

    let (status, _, body) = send(&app, Method::GET, "/health/db").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn test_info_reports_profile() {
    let app = test_app().await;
    let (status, _, body) = send(&app, Method::GET, "/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "detecktiv");
    assert_eq!(body["profile"], "test");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_protected_routes_require_bearer_token() {
    let app = test_app().await;

    for path in ["/v1/auth/me", "/v1/users", "/v1/companies", "/v1/tenants"] {
        let (status, headers, body) = send(&app, Method::GET, path).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = test_app().await;
    let (status, _, body) = send(&app, Method::GET, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/v1/auth/login"].is_object());
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}

async fn limited_app(limit: u32) -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let config = AppConfig {
        rate_limit_requests: limit,
        rate_limit_window_seconds: 60,
        ..test_config()
    };
    create_app(AppState::from_config(config, db).unwrap())
}

async fn send_with(app: &Router, uri: &str, headers: &[(&str, &str)]) -> axum::response::Response {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_rate_limit_refuses_requests_past_the_window_limit() {
    let app = limited_app(2).await;

    let first = send_with(&app, "/info", &[]).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");
    let reset: i64 = first.headers()["x-ratelimit-reset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(reset > chrono::Utc::now().timestamp());

    let second = send_with(&app, "/info", &[]).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = send_with(&app, "/info", &[("x-request-id", "limited-1")]).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(third.headers()["x-request-id"], "limited-1");
    let retry_after: u64 = third.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let bytes = axum::body::to_bytes(third.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");

    // Other paths keep their own window.
    let other = send_with(&app, "/", &[]).await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_skips_excluded_paths() {
    let app = limited_app(1).await;

    for _ in 0..5 {
        let response = send_with(&app, "/health", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
    for _ in 0..3 {
        let response = send_with(&app, "/metrics", &[]).await;
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}

#[tokio::test]
async fn test_rate_limit_buckets_are_per_tenant() {
    let app = limited_app(1).await;

    assert_eq!(
        send_with(&app, "/info", &[("x-tenant-id", "acme")]).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send_with(&app, "/info", &[("x-tenant-id", "acme")]).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        send_with(&app, "/info", &[("x-tenant-id", "globex")]).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rate_limit_can_be_disabled() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let config = AppConfig {
        rate_limit_enabled: false,
        rate_limit_requests: 1,
        ..test_config()
    };
    let app = create_app(AppState::from_config(config, db).unwrap());

    for _ in 0..3 {
        let response = send_with(&app, "/info", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn test_metrics_endpoint_is_not_cached() {
    let app = test_app().await;
    let response = send_with(&app, "/metrics", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}
