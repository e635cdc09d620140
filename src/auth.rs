//! # Authentication and Authorization
//!
//! Bearer-token extractors for protected endpoints. [`CurrentUser`] resolves
//! an access token to an active user row; [`AdminUser`] additionally requires
//! the admin predicate.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use crate::error::{ApiError, forbidden, unauthorized};
use crate::models::user::Model as UserModel;
use crate::models::User;
use crate::security::{Claims, TokenError, TokenType};
use crate::server::AppState;
use sea_orm::EntityTrait;

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserModel);

/// An authenticated caller that is an administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserModel);

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; an empty token is rejected.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Not authenticated")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(unauthorized(Some(
            "Authorization header must use Bearer scheme",
        )));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(unauthorized(Some("Not authenticated")));
    }
    Ok(token)
}

pub(crate) fn token_rejection(error: TokenError) -> ApiError {
    match error {
        TokenError::Expired => unauthorized(Some("Token expired")),
        TokenError::WrongType => unauthorized(Some("Invalid token type")),
        TokenError::Invalid | TokenError::Signing(_) => unauthorized(Some("Invalid token")),
    }
}

/// Load the user behind verified claims and enforce revocation, activity and
/// tenant consistency.
pub(crate) async fn user_for_claims(
    state: &AppState,
    claims: &Claims,
) -> Result<UserModel, ApiError> {
    let user_id = claims
        .user_id()
        .ok_or_else(|| unauthorized(Some("Invalid token subject")))?;

    let user = User::find_by_id(user_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| unauthorized(Some("User not found")))?;

    if !user.is_active {
        return Err(forbidden(Some("User disabled")));
    }
    if claims.tv != user.token_version {
        return Err(unauthorized(Some("Token revoked")));
    }
    if let (Some(token_tenant), Some(user_tenant)) = (claims.tid, user.tenant_id)
        && token_tenant != user_tenant
    {
        return Err(forbidden(Some("Tenant mismatch")));
    }

    Ok(user)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let claims = state
            .tokens
            .decode(token, TokenType::Access)
            .map_err(token_rejection)?;

        let user = user_for_claims(&state, &claims).await?;
        tracing::debug!(user_id = user.id, "authenticated request");
        Ok(CurrentUser(user))
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(forbidden(Some("Admin privileges required")));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_accepts_any_scheme_case() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bearer  abc ")).unwrap(), "abc");
    }

    #[test]
    fn bearer_token_rejects_missing_or_malformed_headers() {
        for value in ["Basic dGVzdDoxMjM=", "Bearer", "Bearer   ", "token"] {
            let err = bearer_token(&headers(value)).unwrap_err();
            assert_eq!(err.status, StatusCode::UNAUTHORIZED, "{value:?}");
        }
        let err = bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(&*err.detail, "Not authenticated");
    }

    #[test]
    fn token_errors_map_to_401() {
        for error in [TokenError::Expired, TokenError::WrongType, TokenError::Invalid] {
            assert_eq!(token_rejection(error).status, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(&*token_rejection(TokenError::Expired).detail, "Token expired");
    }
}
