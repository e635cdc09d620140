//! # Auth Handlers
//!
//! Login, token refresh, logout and the current-user endpoint.

use axum::{
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{CurrentUser, bearer_token, token_rejection, user_for_claims};
use crate::error::{ApiError, bad_request, forbidden, unauthorized};
use crate::handlers::optional_json;
use crate::handlers::types::UserResponse;
use crate::repositories::{LockoutPolicy, LoginOutcome, UserRepository};
use crate::security::{TokenPair, TokenType};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "analyst@example.com")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Epoch seconds
    pub access_expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub revoked: bool,
}

/// Exchange email and password for an access/refresh token pair
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPair),
        (status = 400, description = "Malformed request", body = ApiError),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 403, description = "User disabled", body = ApiError),
        (status = 429, description = "Account temporarily locked", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let Json(request) = body?;
    if request.email.trim().is_empty() {
        return Err(bad_request("Email is required"));
    }
    if request.password.is_empty() || request.password.len() > 256 {
        return Err(bad_request("Password must be between 1 and 256 characters"));
    }

    let repo = UserRepository::new(&state.db, &state.hasher);
    let now = Utc::now();
    let outcome = repo
        .authenticate(
            &request.email,
            &request.password,
            LockoutPolicy::from_config(&state.config),
            now.into(),
        )
        .await?;

    match outcome {
        LoginOutcome::Authenticated(user) => {
            let pair = state
                .tokens
                .issue_pair(&user.token_subject())
                .map_err(anyhow::Error::from)?;
            metrics::counter!("auth_login_total", "outcome" => "success").increment(1);
            tracing::info!(user_id = user.id, email = %user.email, "user login succeeded");
            Ok(Json(pair))
        }
        LoginOutcome::Locked { until } => {
            metrics::counter!("auth_login_total", "outcome" => "locked").increment(1);
            let remaining = (until.with_timezone(&Utc) - now).num_seconds().max(1) as u64;
            Err(ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Account temporarily locked",
            )
            .with_retry_after(remaining))
        }
        LoginOutcome::InvalidCredentials => {
            metrics::counter!("auth_login_total", "outcome" => "invalid").increment(1);
            Err(unauthorized(Some("Invalid credentials")))
        }
        LoginOutcome::Disabled => {
            metrics::counter!("auth_login_total", "outcome" => "disabled").increment(1);
            Err(forbidden(Some("User disabled")))
        }
    }
}

fn refresh_token_from(headers: &HeaderMap, body: &[u8]) -> Result<String, ApiError> {
    let request: RefreshRequest = optional_json(body)?;
    if let Some(token) = request
        .refresh_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
    {
        return Ok(token);
    }

    match bearer_token(headers) {
        Ok(token) => Ok(token.to_string()),
        Err(_) => Err(unauthorized(Some("Missing refresh token"))),
    }
}

/// Exchange a refresh token for a new access token
///
/// The refresh token is read from the JSON body, falling back to the
/// `Authorization: Bearer` header.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the token is sent as a bearer header"),
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ApiError),
        (status = 403, description = "User disabled or tenant mismatch", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    let token = refresh_token_from(&headers, &body)?;
    let claims = state
        .tokens
        .decode(&token, TokenType::Refresh)
        .map_err(token_rejection)?;
    let user = user_for_claims(&state, &claims).await?;

    let access = state
        .tokens
        .issue(&user.token_subject(), TokenType::Access)
        .map_err(anyhow::Error::from)?;

    tracing::debug!(user_id = user.id, "access token refreshed");
    Ok(Json(AccessTokenResponse {
        access_token: access.token,
        token_type: "Bearer".to_string(),
        access_expires_at: access.expires_at.timestamp(),
    }))
}

/// Revoke every token issued to the caller
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tokens revoked", body = LogoutResponse),
        (status = 401, description = "Not authenticated", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<LogoutResponse>, ApiError> {
    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo.revoke_tokens(user).await?;
    tracing::info!(user_id = user.id, "user logged out");
    Ok(Json(LogoutResponse { revoked: true }))
}

/// The authenticated user
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::AUTHORIZATION};

    #[test]
    fn refresh_token_prefers_body_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let token = refresh_token_from(&headers, br#"{"refresh_token":"from-body"}"#).unwrap();
        assert_eq!(token, "from-body");

        let token = refresh_token_from(&headers, b"").unwrap();
        assert_eq!(token, "from-header");

        let token = refresh_token_from(&headers, br#"{"refresh_token":"  "}"#).unwrap();
        assert_eq!(token, "from-header");
    }

    #[test]
    fn refresh_token_missing_is_unauthorized() {
        let err = refresh_token_from(&HeaderMap::new(), b"{}").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(&*err.detail, "Missing refresh token");
    }
}
