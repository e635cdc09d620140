//! Shared helpers for integration tests: an in-memory database with all
//! migrations applied and a real server bound to an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;

use anyhow::{Context, Result};
use detecktiv::config::AppConfig;
use detecktiv::models::user::Model as UserModel;
use detecktiv::repositories::{NewUser, UserRepository};
use detecktiv::security::PasswordHasher;
use detecktiv::server::{AppState, create_app};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

pub const TEST_SECRET: &str = "integration-tests-secret-0123456789abcdef";
pub const PASSWORD: &str = "CorrectHorse9!";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration tuned for tests: cheap hashing and a fixed JWT secret.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        jwt_secret: Some(TEST_SECRET.to_string()),
        pbkdf2_iterations: 1_000,
        max_failed_logins: 3,
        lockout_minutes: 15,
        rate_limit_enabled: false,
        ..Default::default()
    }
}

pub fn test_hasher() -> PasswordHasher {
    PasswordHasher::from_config(&test_config())
}

pub struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl TestServerHandle {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

impl Drop for TestServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestApp {
    pub url: String,
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub handle: TestServerHandle,
}

impl TestApp {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// Inserts a user straight through the repository.
    pub async fn create_user(&self, email: &str, role: &str) -> UserModel {
        let hasher = PasswordHasher::from_config(&self.config);
        UserRepository::new(&self.db, &hasher)
            .create(NewUser {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                full_name: None,
                role: Some(role.to_string()),
                is_active: Some(true),
                is_superuser: Some(false),
                tenant_id: None,
            })
            .await
            .expect("create test user")
    }

    /// Logs in and returns the token pair JSON.
    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.http
            .post(self.endpoint("/v1/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("login request")
    }

    /// Creates a user with the given role and returns its access token.
    pub async fn access_token_for(&self, email: &str, role: &str) -> String {
        self.create_user(email, role).await;
        let body: Value = self
            .login(email, PASSWORD)
            .await
            .json()
            .await
            .expect("token pair");
        body["access_token"]
            .as_str()
            .expect("access_token present")
            .to_string()
    }
}

/// Spawns the full application on `127.0.0.1:0`.
pub async fn spawn_test_app(config: AppConfig) -> TestApp {
    let db = setup_test_db().await.expect("test database");
    let state = AppState::from_config(config.clone(), db.clone()).expect("app state");
    spawn_with_state(state, config, db).await
}

pub async fn spawn_with_state(state: AppState, config: AppConfig, db: DatabaseConnection) -> TestApp {
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("axum server error")
    });

    TestApp {
        url: format!("http://{addr}"),
        db,
        config,
        http: reqwest::Client::new(),
        handle: TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        },
    }
}
