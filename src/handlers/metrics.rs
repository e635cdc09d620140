//! Prometheus exposition endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{service_unavailable, unauthorized};
use crate::server::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `true` when no metrics credentials are configured, or when the request
/// carries matching Basic credentials.
fn authorized(config: &AppConfig, headers: &HeaderMap) -> bool {
    if config.metrics_username.is_none() && config.metrics_password.is_none() {
        return true;
    }
    let expected_user = config.metrics_username.as_deref().unwrap_or_default();
    let expected_pass = config.metrics_password.as_deref().unwrap_or_default();

    let Some(decoded) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return false;
    };

    let user_ok: bool = user.as_bytes().ct_eq(expected_user.as_bytes()).into();
    let pass_ok: bool = pass.as_bytes().ct_eq(expected_pass.as_bytes()).into();
    user_ok & pass_ok
}

/// Prometheus metrics in text exposition format
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Metrics in Prometheus text format", body = String, content_type = "text/plain"),
        (status = 401, description = "Basic credentials required"),
        (status = 503, description = "No metrics recorder installed")
    ),
    tag = "health"
)]
pub async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state.config, &headers) {
        let mut response = unauthorized(Some("Metrics authentication required")).into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"metrics\""),
        );
        return response;
    }

    let Some(handle) = state.metrics.as_ref() else {
        return service_unavailable("Metrics recorder is not installed").into_response();
    };

    let mut response = (StatusCode::OK, handle.render()).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")));
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn open_when_no_credentials_are_configured() {
        assert!(authorized(&AppConfig::default(), &HeaderMap::new()));
    }

    #[test]
    fn configured_credentials_must_match() {
        let config = AppConfig {
            metrics_username: Some("scraper".to_string()),
            metrics_password: Some("s3cret".to_string()),
            ..Default::default()
        };

        assert!(authorized(&config, &basic("scraper", "s3cret")));
        assert!(!authorized(&config, &basic("scraper", "wrong")));
        assert!(!authorized(&config, &basic("other", "s3cret")));
        assert!(!authorized(&config, &HeaderMap::new()));

        let mut bearer = HeaderMap::new();
        bearer.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert!(!authorized(&config, &bearer));
    }

    #[test]
    fn password_only_configuration_accepts_an_empty_user() {
        let config = AppConfig {
            metrics_password: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert!(authorized(&config, &basic("", "s3cret")));
        assert!(!authorized(&config, &basic("", "nope")));
    }
}
