//! # API Client
//!
//! Typed HTTP client for the detecktiv API with transparent access-token
//! refresh. A request that comes back 401 triggers one refresh and is retried
//! exactly once. Refreshes are single-flight: concurrent callers that saw the
//! same token generation share one `POST /v1/auth/refresh`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::handlers::auth::AccessTokenResponse;
use crate::handlers::types::{CompanyListResponse, CompanyResponse, PagedUsers, UserResponse};
use crate::handlers::users::{CreateUserRequest, UpdateUserRequest};
use crate::repositories::CompanyCreate;
use crate::security::TokenPair;

const REFRESH_PATH: &str = "/v1/auth/refresh";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-2xx response; `detail` carries the server's `detail` or `message`.
    #[error("HTTP {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Access and refresh tokens held by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: url::Url,
    tokens: Arc<RwLock<TokenStore>>,
    refresh_gate: Arc<Mutex<()>>,
    /// Bumped after every refresh attempt, successful or not
    generation: Arc<AtomicU64>,
}

/// Extract a readable message from an error response body.
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message"] {
            match value.get(key) {
                Some(Value::String(text)) if !text.is_empty() => return text.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.chars().take(200).collect()
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        detail: error_detail(status, &body),
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("detecktiv-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http(http, base_url)?)
    }

    /// `base_url` may carry a path prefix; request paths are joined below it.
    pub fn with_http(http: reqwest::Client, base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = url::Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let prefixed = format!("{}/", base_url.path());
            base_url.set_path(&prefixed);
        }
        Ok(Self {
            http,
            base_url,
            tokens: Arc::new(RwLock::new(TokenStore::default())),
            refresh_gate: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn set_tokens(&self, tokens: TokenStore) {
        *self.tokens.write().await = tokens;
    }

    pub async fn tokens(&self) -> TokenStore {
        self.tokens.read().await.clone()
    }

    pub async fn clear_tokens(&self) {
        *self.tokens.write().await = TokenStore::default();
    }

    fn url(&self, path: &str) -> Result<url::Url, ClientError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn execute(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.http.request(method.clone(), self.url(path)?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send a request with the stored access token.
    ///
    /// On 401 the access token is refreshed and the request retried once.
    /// Non-2xx responses become [`ClientError::Api`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let observed = self.generation.load(Ordering::SeqCst);
        let token = self.tokens.read().await.access_token.clone();

        let response = self
            .execute(&method, path, query, body.as_ref(), token.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED || path == REFRESH_PATH {
            return check(response).await;
        }

        if !self.try_refresh_token(observed).await {
            return check(response).await;
        }

        let token = self.tokens.read().await.access_token.clone();
        let retried = self
            .execute(&method, path, query, body.as_ref(), token.as_deref())
            .await?;
        check(retried).await
    }

    /// Refresh the access token unless another caller already did so since
    /// generation `observed`. Returns whether a usable access token is stored.
    pub async fn try_refresh_token(&self, observed: u64) -> bool {
        let _gate = self.refresh_gate.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            return self.tokens.read().await.access_token.is_some();
        }

        let refresh_token = self.tokens.read().await.refresh_token.clone();
        let refreshed = match refresh_token {
            Some(refresh_token) => self.request_refresh(&refresh_token).await,
            None => Err(ClientError::Api {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                detail: "Missing refresh token".to_string(),
            }),
        };

        let ok = match refreshed {
            Ok(access) => {
                self.tokens.write().await.access_token = Some(access.access_token);
                tracing::debug!("access token refreshed");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "token refresh failed; clearing stored tokens");
                self.clear_tokens().await;
                false
            }
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        ok
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<AccessTokenResponse, ClientError> {
        let body = json!({ "refresh_token": refresh_token });
        let response = self
            .execute(&Method::POST, REFRESH_PATH, &[], Some(&body), None)
            .await?;
        decode(check(response).await?).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        decode(self.send(method, path, query, body).await?).await
    }

    fn to_value<B: Serialize>(body: &B) -> Result<Value, ClientError> {
        serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Log in and store the returned token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ClientError> {
        let body = json!({ "email": email, "password": password });
        let response = self
            .execute(&Method::POST, "/v1/auth/login", &[], Some(&body), None)
            .await?;
        let pair: TokenPair = decode(check(response).await?).await?;
        self.set_tokens(TokenStore {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        })
        .await;
        Ok(pair)
    }

    /// Revoke server-side tokens and forget the local ones.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.send(Method::POST, "/v1/auth/logout", &[], None).await;
        self.clear_tokens().await;
        result.map(|_| ())
    }

    pub async fn me(&self) -> Result<UserResponse, ClientError> {
        self.send_json(Method::GET, "/v1/auth/me", &[], None).await
    }

    pub async fn list_users_paged(
        &self,
        page: u64,
        page_size: u64,
        q: Option<&str>,
    ) -> Result<PagedUsers, ClientError> {
        let mut query = vec![("page", page.to_string()), ("page_size", page_size.to_string())];
        if let Some(q) = q {
            query.push(("q", q.to_string()));
        }
        self.send_json(Method::GET, "/v1/users/paged", &query, None).await
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<UserResponse, ClientError> {
        let body = Self::to_value(request)?;
        self.send_json(Method::POST, "/v1/users", &[], Some(body)).await
    }

    pub async fn update_user(
        &self,
        user_id: i32,
        request: &UpdateUserRequest,
    ) -> Result<UserResponse, ClientError> {
        let body = Self::to_value(request)?;
        self.send_json(Method::PATCH, &format!("/v1/users/{user_id}"), &[], Some(body))
            .await
    }

    pub async fn deactivate_user(&self, user_id: i32) -> Result<(), ClientError> {
        self.send(Method::DELETE, &format!("/v1/users/{user_id}"), &[], None)
            .await
            .map(|_| ())
    }

    pub async fn list_companies(
        &self,
        page: u64,
        page_size: u64,
        name: Option<&str>,
    ) -> Result<CompanyListResponse, ClientError> {
        let mut query = vec![("page", page.to_string()), ("page_size", page_size.to_string())];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        self.send_json(Method::GET, "/v1/companies", &query, None).await
    }

    pub async fn create_company(&self, company: &CompanyCreate) -> Result<CompanyResponse, ClientError> {
        let body = Self::to_value(company)?;
        self.send_json(Method::POST, "/v1/companies", &[], Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detail_prefers_detail_then_message() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_detail(status, r#"{"detail":"bad email"}"#), "bad email");
        assert_eq!(error_detail(status, r#"{"message":"nope"}"#), "nope");
        assert_eq!(
            error_detail(status, r#"{"detail":[{"loc":["email"]}]}"#),
            r#"[{"loc":["email"]}]"#
        );
        assert_eq!(error_detail(status, "plain text"), "plain text");
        assert_eq!(error_detail(status, ""), "Bad Request");
    }

    #[test]
    fn urls_join_onto_the_base_path() {
        let client = ApiClient::new("http://localhost:8000/").unwrap();
        assert_eq!(
            client.url("/v1/auth/me").unwrap().as_str(),
            "http://localhost:8000/v1/auth/me"
        );
    }

    #[test]
    fn urls_keep_a_path_prefix() {
        for base in ["https://example.com/api", "https://example.com/api/"] {
            let client = ApiClient::new(base).unwrap();
            assert_eq!(
                client.url("/v1/auth/me").unwrap().as_str(),
                "https://example.com/api/v1/auth/me"
            );
        }

        let client = ApiClient::new("http://localhost:8000").unwrap();
        assert_eq!(
            client.url("v1/companies").unwrap().as_str(),
            "http://localhost:8000/v1/companies"
        );
    }
}
