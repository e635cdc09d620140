//! # Admin Handlers
//!
//! One-time creation of the first administrator on a fresh deployment.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, bad_request, forbidden};
use crate::handlers::types::UserResponse;
use crate::models::user::ROLE_ADMIN;
use crate::repositories::{NewUser, UserRepository};
use crate::server::AppState;

pub const MIN_ADMIN_PASSWORD_LENGTH: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BootstrapRequest {
    pub email: String,
    /// At least 12 characters
    pub password: String,
    pub full_name: Option<String>,
    pub tenant_id: Option<i32>,
}

/// Create the first admin user
///
/// Unauthenticated, but only available while `ENABLE_ADMIN_BOOTSTRAP` is on
/// and the users table is empty.
#[utoipa::path(
    post,
    path = "/v1/admin/bootstrap",
    request_body = BootstrapRequest,
    responses(
        (status = 201, description = "Admin created", body = UserResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Bootstrap disabled or already completed", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn bootstrap_admin(
    State(state): State<AppState>,
    body: Result<Json<BootstrapRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    if !state.config.enable_admin_bootstrap {
        return Err(forbidden(Some("Bootstrap is disabled")));
    }
    let Json(request) = body?;

    let repo = UserRepository::new(&state.db, &state.hasher);
    if repo.count().await? > 0 {
        return Err(forbidden(Some("Bootstrap already completed")));
    }

    let length = request.password.chars().count();
    if !(MIN_ADMIN_PASSWORD_LENGTH..=256).contains(&length) {
        return Err(bad_request(&format!(
            "Admin password must be between {MIN_ADMIN_PASSWORD_LENGTH} and 256 characters"
        )));
    }

    let admin = repo
        .create(NewUser {
            email: request.email,
            password: request.password,
            full_name: request.full_name,
            role: Some(ROLE_ADMIN.to_string()),
            is_active: Some(true),
            is_superuser: Some(true),
            tenant_id: request.tenant_id,
        })
        .await?;

    tracing::warn!(
        user_id = admin.id,
        email = %admin.email,
        "admin bootstrap completed; disable ENABLE_ADMIN_BOOTSTRAP"
    );
    Ok((StatusCode::CREATED, Json(admin.into())))
}
