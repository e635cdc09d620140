//! # Health Handlers
//!
//! Liveness, readiness and service information endpoints. None of these
//! require authentication.

use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::db;
use crate::error::{ApiError, service_unavailable};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    pub service: String,
    pub version: String,
    pub profile: String,
}

fn no_store(body: Value, status: StatusCode) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is alive")),
    tag = "health"
)]
pub async fn health() -> Response {
    no_store(json!({ "status": "ok" }), StatusCode::OK)
}

/// Readiness probe: database ping plus configuration presence checks
#[utoipa::path(
    get,
    path = "/readiness",
    responses(
        (status = 200, description = "Service is ready"),
        (status = 503, description = "A dependency is unavailable")
    ),
    tag = "health"
)]
pub async fn readiness(State(state): State<AppState>) -> Response {
    let started = Instant::now();

    let db_ok = if state.config.health_skip_db_check {
        true
    } else {
        match db::health_check(&state.db).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(error = %error, "readiness database check failed");
                false
            }
        }
    };

    let body = json!({
        "status": if db_ok { "ready" } else { "degraded" },
        "checks": {
            "db": db_ok,
            "companies_house_configured": state.companies_house.is_some(),
        },
        "duration_ms": started.elapsed().as_millis() as u64,
    });
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    no_store(body, status)
}

/// Database connectivity check
#[utoipa::path(
    get,
    path = "/health/db",
    responses(
        (status = 200, description = "Database connected"),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "health"
)]
pub async fn health_db(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    db::health_check(&state.db).await.map_err(|error| {
        tracing::error!(error = %error, "database health check failed");
        service_unavailable("Database unavailable")
    })?;
    Ok(Json(json!({ "status": "ok", "database": "connected" })))
}

/// Service name, version and active profile
#[utoipa::path(
    get,
    path = "/info",
    responses((status = 200, description = "Service information", body = InfoResponse)),
    tag = "health"
)]
pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "detecktiv".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        profile: state.config.profile.clone(),
    })
}
