//! Tenants, password reset and admin bootstrap.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use detecktiv::mail::{MailError, Mailer};
use detecktiv::models::user::{ROLE_ADMIN, ROLE_MEMBER};
use detecktiv::server::AppState;
use reqwest::StatusCode;
use serde_json::{Value, json};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{PASSWORD, setup_test_db, spawn_test_app, spawn_with_state, test_config};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String, Option<String>)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(
        &self,
        to: &str,
        token: &str,
        link: Option<&str>,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), token.to_string(), link.map(str::to_string)));
        Ok(())
    }
}

#[tokio::test]
async fn admin_manages_tenants() {
    let app = spawn_test_app(test_config()).await;
    let admin = app.access_token_for("admin@example.com", ROLE_ADMIN).await;

    let response = app
        .http
        .post(app.endpoint("/v1/tenants"))
        .bearer_auth(&admin)
        .json(&json!({ "key": "acme", "name": "Acme" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    let tenant: Value = response.json().await.unwrap();
    assert_eq!(location, format!("/v1/tenants/{}", tenant["id"]));

    let response = app
        .http
        .post(app.endpoint("/v1/tenants"))
        .bearer_auth(&admin)
        .json(&json!({ "key": "acme" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .http
        .post(app.endpoint("/v1/tenants"))
        .bearer_auth(&admin)
        .json(&json!({ "key": "Not Valid!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let listed: Value = app
        .http
        .get(app.endpoint("/v1/tenants"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = app
        .http
        .get(app.endpoint("/v1/tenants/999"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forgot_and_reset_password_round_trip() {
    let mut config = test_config();
    config.allow_reset_token_in_response = true;
    config.reset_link_base = Some("https://app.example.com/reset".to_string());
    let app = spawn_test_app(config).await;
    app.create_user("grace@example.com", ROLE_MEMBER).await;
    let old_pair: Value = app.login("grace@example.com", PASSWORD).await.json().await.unwrap();

    let forgot: Value = app
        .http
        .post(app.endpoint("/v1/password/forgot"))
        .json(&json!({ "email": "grace@example.com" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(forgot["ok"], true);
    let token = forgot["reset_token"].as_str().unwrap().to_string();
    assert!(
        forgot["reset_link"]
            .as_str()
            .unwrap()
            .starts_with("https://app.example.com/reset?token=")
    );

    let response = app
        .http
        .post(app.endpoint("/v1/password/reset"))
        .json(&json!({ "token": token, "new_password": "BrandNewSecret7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Reuse fails because the reset bumped the token version.
    let response = app
        .http
        .post(app.endpoint("/v1/password/reset"))
        .json(&json!({ "token": token, "new_password": "YetAnotherSecret8" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Reset token no longer valid");

    let response = app
        .http
        .get(app.endpoint("/v1/auth/me"))
        .bearer_auth(old_pair["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(
        app.login("grace@example.com", "BrandNewSecret7").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn forgot_password_never_reveals_accounts() {
    let config = test_config();
    let db = setup_test_db().await.unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::from_config(config.clone(), db.clone())
        .unwrap()
        .with_mailer(mailer.clone());
    let app = spawn_with_state(state, config, db).await;
    app.create_user("heidi@example.com", ROLE_MEMBER).await;

    for email in ["heidi@example.com", "ghost@example.com"] {
        let body: Value = app
            .http
            .post(app.endpoint("/v1/password/forgot"))
            .json(&json!({ "email": email }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert!(body.get("reset_token").is_none());
    }

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "heidi@example.com");
    assert!(!sent[0].1.is_empty());
}

#[tokio::test]
async fn reset_rejects_garbage_tokens() {
    let app = spawn_test_app(test_config()).await;
    let response = app
        .http
        .post(app.endpoint("/v1/password/reset"))
        .json(&json!({ "token": "garbage", "new_password": "BrandNewSecret7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Invalid reset token");
}

#[tokio::test]
async fn admin_reset_link_requires_admin() {
    let app = spawn_test_app(test_config()).await;
    let admin = app.access_token_for("admin@example.com", ROLE_ADMIN).await;
    let member = app.create_user("ivan@example.com", ROLE_MEMBER).await;
    let member_token: Value = app.login("ivan@example.com", PASSWORD).await.json().await.unwrap();

    let response = app
        .http
        .post(app.endpoint("/v1/password/admin/create-reset-link"))
        .bearer_auth(member_token["access_token"].as_str().unwrap())
        .json(&json!({ "user_id": member.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body: Value = app
        .http
        .post(app.endpoint("/v1/password/admin/create-reset-link"))
        .bearer_auth(&admin)
        .json(&json!({ "user_id": member.id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["reset_token"].is_string());
    assert!(body["expires_at"].as_i64().unwrap() > Utc::now().timestamp());
}

#[tokio::test]
async fn bootstrap_is_gated_and_single_use() {
    let app = spawn_test_app(test_config()).await;
    let response = app
        .http
        .post(app.endpoint("/v1/admin/bootstrap"))
        .json(&json!({ "email": "root@example.com", "password": "a-very-long-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut config = test_config();
    config.enable_admin_bootstrap = true;
    let app = spawn_test_app(config).await;

    let response = app
        .http
        .post(app.endpoint("/v1/admin/bootstrap"))
        .json(&json!({ "email": "root@example.com", "password": "short" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .http
        .post(app.endpoint("/v1/admin/bootstrap"))
        .json(&json!({ "email": "root@example.com", "password": "a-very-long-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let admin: Value = response.json().await.unwrap();
    assert_eq!(admin["role"], "admin");
    assert_eq!(admin["is_superuser"], true);

    let response = app
        .http
        .post(app.endpoint("/v1/admin/bootstrap"))
        .json(&json!({ "email": "second@example.com", "password": "a-very-long-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Bootstrap already completed");
}
