//! The `/metrics` endpoint over a running server.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use detecktiv::models::user::ROLE_MEMBER;
use reqwest::{StatusCode, header};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{PASSWORD, spawn_test_app, test_config};

/// Value of the first sample line starting with `series`, or 0.
fn sample(body: &str, series: &str) -> f64 {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| line.strip_prefix(series))
        .and_then(|rest| rest.trim().parse().ok())
        .unwrap_or(0.0)
}

#[tokio::test]
async fn successful_login_is_counted() {
    let app = spawn_test_app(test_config()).await;
    app.create_user("counted@example.com", ROLE_MEMBER).await;

    let before = app
        .http
        .get(app.endpoint("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let series = "auth_login_total{outcome=\"success\"}";
    let start = sample(&before, series);

    let login = app.login("counted@example.com", PASSWORD).await;
    assert_eq!(login.status(), StatusCode::OK);

    let response = app.http.get(app.endpoint("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = response.text().await.unwrap();
    assert!(body.contains(series), "{body}");
    assert!(sample(&body, series) >= start + 1.0);
}

#[tokio::test]
async fn configured_credentials_are_required() {
    let mut config = test_config();
    config.metrics_username = Some("scraper".to_string());
    config.metrics_password = Some("s3cret".to_string());
    let app = spawn_test_app(config).await;

    let anonymous = app
        .http
        .get(app.endpoint("/metrics"))
        .header("x-request-id", "scrape-1")
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        anonymous.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"metrics\""
    );
    assert_eq!(anonymous.headers()["x-request-id"], "scrape-1");

    let wrong = app
        .http
        .get(app.endpoint("/metrics"))
        .basic_auth("scraper", Some("nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let encoded = STANDARD.encode("scraper:s3cret");
    let ok = app
        .http
        .get(app.endpoint("/metrics"))
        .header(header::AUTHORIZATION, format!("Basic {encoded}"))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert!(
        ok.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}
