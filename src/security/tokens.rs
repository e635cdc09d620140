//! HS256 JSON Web Tokens for access, refresh and password-reset flows.
//!
//! Every token embeds the user's `token_version` (`tv`); bumping the version
//! on the user row revokes all outstanding tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::{AppConfig, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    #[serde(rename = "pwreset")]
    PasswordReset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::PasswordReset => "pwreset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub tid: Option<i32>,
    #[serde(default)]
    pub tv: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    /// Numeric user id from `sub`, if it parses.
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

/// The user attributes a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: i32,
    pub role: String,
    pub tenant_id: Option<i32>,
    pub token_version: i32,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Login response: access and refresh tokens with expiry as epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Wrong token type")]
    WrongType,
    #[error("Invalid token")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_seconds: u64,
    access_ttl: Duration,
    refresh_ttl: Duration,
    reset_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let secret = config.jwt_secret()?;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            leeway_seconds: config.jwt_leeway_seconds,
            access_ttl: Duration::seconds(config.access_token_expires_seconds),
            refresh_ttl: Duration::seconds(config.refresh_token_expires_seconds),
            reset_ttl: Duration::seconds(config.password_reset_expires_seconds),
        })
    }

    fn ttl(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
            TokenType::PasswordReset => self.reset_ttl,
        }
    }

    pub fn issue(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_with_ttl(subject, token_type, self.ttl(token_type))
    }

    fn issue_with_ttl(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = Claims {
            sub: subject.user_id.to_string(),
            token_type,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            role: (token_type == TokenType::Access).then(|| subject.role.clone()),
            tid: subject.tenant_id,
            tv: subject.token_version,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<TokenPair, TokenError> {
        let access = self.issue(subject, TokenType::Access)?;
        let refresh = self.issue(subject, TokenType::Refresh)?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            access_expires_at: access.expires_at.timestamp(),
            refresh_expires_at: refresh.expires_at.timestamp(),
        })
    }

    /// Verifies signature, time claims, issuer/audience and the token type.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_seconds;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(data.claims)
    }
}
