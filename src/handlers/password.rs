//! # Password Reset Handlers
//!
//! Forgot/reset flow built on short-lived `pwreset` tokens that embed the
//! user's token version, so a reset token dies with the next password change.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AdminUser;
use crate::error::{ApiError, bad_request, not_found};
use crate::handlers::users::check_password_length;
use crate::mail::reset_link;
use crate::repositories::UserRepository;
use crate::security::{TokenError, TokenType, validate_password};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordResponse {
    pub ok: bool,
    /// Only present when tokens may be returned in responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateResetLinkRequest {
    pub user_id: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateResetLinkResponse {
    pub ok: bool,
    pub reset_token: String,
    pub reset_link: Option<String>,
    /// Epoch seconds
    pub expires_at: i64,
}

/// Request a password reset
///
/// Always answers `{"ok": true}` so the endpoint cannot be used to probe
/// which emails are registered.
#[utoipa::path(
    post,
    path = "/v1/password/forgot",
    request_body = ForgotPasswordRequest,
    responses((status = 200, description = "Request accepted", body = ForgotPasswordResponse)),
    tag = "password"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<ForgotPasswordResponse>, ApiError> {
    let Json(request) = body?;
    let mut response = ForgotPasswordResponse {
        ok: true,
        ..Default::default()
    };

    let repo = UserRepository::new(&state.db, &state.hasher);
    let Some(user) = repo.get_by_email(&request.email).await? else {
        return Ok(Json(response));
    };

    let issued = state
        .tokens
        .issue(&user.token_subject(), TokenType::PasswordReset)
        .map_err(anyhow::Error::from)?;
    let link = reset_link(state.config.reset_link_base.as_deref(), &issued.token);

    if state.config.allow_reset_token_in_response {
        tracing::info!(user_id = user.id, "password reset token issued in response");
        response.reset_token = Some(issued.token);
        response.reset_link = link;
        return Ok(Json(response));
    }

    match state
        .mailer
        .send_password_reset(&user.email, &issued.token, link.as_deref(), issued.expires_at)
        .await
    {
        Ok(()) => tracing::info!(user_id = user.id, "password reset email sent"),
        Err(error) => tracing::error!(user_id = user.id, %error, "password reset email failed"),
    }
    Ok(Json(response))
}

/// Set a new password using a reset token
#[utoipa::path(
    post,
    path = "/v1/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = ResetPasswordResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = ApiError)
    ),
    tag = "password"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<ResetPasswordResponse>, ApiError> {
    let Json(request) = body?;
    validate_password(&request.new_password).map_err(|e| bad_request(&e.to_string()))?;
    check_password_length(&request.new_password)?;

    let claims = state
        .tokens
        .decode(request.token.trim(), TokenType::PasswordReset)
        .map_err(|error| match error {
            TokenError::Expired => bad_request("Reset token expired"),
            _ => bad_request("Invalid reset token"),
        })?;
    let user_id = claims
        .user_id()
        .ok_or_else(|| bad_request("Invalid subject"))?;

    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo
        .get(user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| bad_request("Invalid reset token"))?;
    if claims.tv != user.token_version {
        return Err(bad_request("Reset token no longer valid"));
    }

    let user = repo.set_password(user, &request.new_password, true).await?;
    tracing::info!(user_id = user.id, "password reset completed");
    Ok(Json(ResetPasswordResponse { ok: true }))
}

/// Generate a reset token for a user (admin)
#[utoipa::path(
    post,
    path = "/v1/password/admin/create-reset-link",
    security(("bearer_auth" = [])),
    request_body = CreateResetLinkRequest,
    responses(
        (status = 200, description = "Reset token issued", body = CreateResetLinkResponse),
        (status = 403, description = "Admin privileges required", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "password"
)]
pub async fn create_reset_link(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<CreateResetLinkRequest>, JsonRejection>,
) -> Result<Json<CreateResetLinkResponse>, ApiError> {
    let Json(request) = body?;
    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo
        .get(request.user_id)
        .await?
        .ok_or_else(|| not_found("User not found"))?;

    let issued = state
        .tokens
        .issue(&user.token_subject(), TokenType::PasswordReset)
        .map_err(anyhow::Error::from)?;
    tracing::info!(user_id = user.id, issued_by = admin.id, "admin issued password reset");

    Ok(Json(CreateResetLinkResponse {
        ok: true,
        reset_link: reset_link(state.config.reset_link_base.as_deref(), &issued.token),
        reset_token: issued.token,
        expires_at: issued.expires_at.timestamp(),
    }))
}
