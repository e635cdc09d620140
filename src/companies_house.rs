//! # Companies House client
//!
//! Thin REST client for the UK Companies House public data API. Requests use
//! HTTP Basic auth with the API key as the username and an empty password.
//! Rate limiting (429) and server errors (5xx) are retried with capped
//! exponential backoff; `Retry-After` is honoured when it parses.

use std::time::Duration;

use axum::http::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::{ApiError, service_unavailable, upstream_error};

const USER_AGENT: &str = "detecktiv.io/preview (+contact: support@detecktiv.io)";
const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_COMPANY_NUMBER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CompaniesHouseError {
    #[error("Companies House API key missing. Set CH_API_KEY in environment.")]
    MissingApiKey,

    #[error("Invalid company number")]
    InvalidCompanyNumber(String),

    #[error("Unauthorized (check CH_API_KEY)")]
    Unauthorized,

    #[error("Companies House returned status {status}")]
    Status { status: u16, body: String },

    #[error("Companies House request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32, status: u16 },

    #[error("Companies House request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid JSON from Companies House: {0}")]
    Decode(String),
}

impl CompaniesHouseError {
    /// Upstream HTTP status, or 0 when no response was received.
    pub fn upstream_status(&self) -> u16 {
        match self {
            CompaniesHouseError::Unauthorized => 401,
            CompaniesHouseError::Status { status, .. } => *status,
            CompaniesHouseError::RetriesExhausted { status, .. } => *status,
            CompaniesHouseError::Network(err) => err.status().map_or(0, |s| s.as_u16()),
            _ => 0,
        }
    }
}

impl From<CompaniesHouseError> for ApiError {
    fn from(error: CompaniesHouseError) -> Self {
        match error {
            CompaniesHouseError::MissingApiKey => service_unavailable(&error.to_string()),
            CompaniesHouseError::InvalidCompanyNumber(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", error.to_string())
            }
            CompaniesHouseError::Status { status, body } => {
                upstream_error("companies_house", status, Some(body))
            }
            other => {
                tracing::warn!(error = %other, "Companies House request failed");
                upstream_error("companies_house", other.upstream_status(), None)
            }
        }
    }
}

/// Delay requested by a `Retry-After` header, capped at [`MAX_RETRY_AFTER`].
/// Unreadable or unrepresentable values fall back to `backoff`.
fn retry_after_delay(header: Option<&HeaderValue>, backoff: Duration) -> Duration {
    header
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|delay| delay.min(MAX_RETRY_AFTER))
        .unwrap_or(backoff)
}

/// Normalises and validates a company number: 1..=16 ASCII alphanumerics,
/// upper-cased.
pub fn validate_company_number(raw: &str) -> Result<String, CompaniesHouseError> {
    let number = raw.trim().to_ascii_uppercase();
    if number.is_empty()
        || number.len() > MAX_COMPANY_NUMBER_LEN
        || !number.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(CompaniesHouseError::InvalidCompanyNumber(raw.to_string()));
    }
    Ok(number)
}

/// Registered office address as returned in a company profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredOfficeAddress {
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// The subset of a company profile used to enrich local company records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyProfile {
    pub company_name: Option<String>,
    pub company_number: Option<String>,
    pub company_status: Option<String>,
    pub registered_office_address: Option<RegisteredOfficeAddress>,
    #[serde(default)]
    pub sic_codes: Vec<String>,
}

impl CompanyProfile {
    pub fn from_value(value: Value) -> Result<Self, CompaniesHouseError> {
        serde_json::from_value(value).map_err(|e| CompaniesHouseError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct CompaniesHouseClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl CompaniesHouseClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompaniesHouseError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CompaniesHouseError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        })
    }

    /// Builds a client when `CH_API_KEY` is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, CompaniesHouseError> {
        match config.ch_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(
                key,
                config.ch_api_base.clone(),
                Duration::from_secs(config.ch_timeout_seconds),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Overrides the retry backoff window.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, CompaniesHouseError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = self.initial_backoff;
        let mut last_status = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .get(&url)
                .query(query)
                .basic_auth(&self.api_key, Some(""))
                .send()
                .await?;

            let status = response.status();
            last_status = status.as_u16();
            metrics::counter!("companies_house_requests_total", "status" => last_status.to_string())
                .increment(1);

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(CompaniesHouseError::Unauthorized);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let delay = retry_after_delay(response.headers().get(RETRY_AFTER), backoff);
                tracing::warn!(path, attempt, delay_ms = delay.as_millis() as u64, "Companies House rate limited");
                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(self.max_backoff);
                continue;
            }

            if status.is_server_error() && attempt < MAX_ATTEMPTS {
                tracing::warn!(path, attempt, status = last_status, "Companies House server error, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.max_backoff);
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CompaniesHouseError::Status {
                    status: last_status,
                    body,
                });
            }

            let bytes = response.bytes().await?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| CompaniesHouseError::Decode(format!("{url}: {e}")));
        }

        Err(CompaniesHouseError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            status: last_status,
        })
    }

    pub async fn search_companies(
        &self,
        q: &str,
        items_per_page: u32,
        start_index: u32,
    ) -> Result<Value, CompaniesHouseError> {
        self.get_json(
            "/search/companies",
            &[
                ("q", q.to_string()),
                ("items_per_page", items_per_page.to_string()),
                ("start_index", start_index.to_string()),
            ],
        )
        .await
    }

    pub async fn company_profile(&self, company_number: &str) -> Result<Value, CompaniesHouseError> {
        let number = validate_company_number(company_number)?;
        self.get_json(&format!("/company/{number}"), &[]).await
    }

    pub async fn officers(&self, company_number: &str) -> Result<Value, CompaniesHouseError> {
        let number = validate_company_number(company_number)?;
        self.get_json(&format!("/company/{number}/officers"), &[]).await
    }

    pub async fn filing_history(
        &self,
        company_number: &str,
        items_per_page: u32,
    ) -> Result<Value, CompaniesHouseError> {
        let number = validate_company_number(company_number)?;
        self.get_json(
            &format!("/company/{number}/filing-history"),
            &[("items_per_page", items_per_page.to_string())],
        )
        .await
    }

    pub async fn persons_with_significant_control(
        &self,
        company_number: &str,
    ) -> Result<Value, CompaniesHouseError> {
        let number = validate_company_number(company_number)?;
        self.get_json(
            &format!("/company/{number}/persons-with-significant-control"),
            &[],
        )
        .await
    }

    pub async fn charges(&self, company_number: &str) -> Result<Value, CompaniesHouseError> {
        let number = validate_company_number(company_number)?;
        self.get_json(&format!("/company/{number}/charges"), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_is_capped_and_falls_back_to_backoff() {
        let backoff = Duration::from_millis(500);
        let delay = |raw: &str| retry_after_delay(Some(&HeaderValue::from_str(raw).unwrap()), backoff);

        assert_eq!(delay("2"), Duration::from_secs(2));
        assert_eq!(delay("0.25"), Duration::from_millis(250));
        assert_eq!(delay("3600"), MAX_RETRY_AFTER);
        assert_eq!(delay("1e20"), backoff);
        assert_eq!(delay("-1"), backoff);
        assert_eq!(delay("NaN"), backoff);
        assert_eq!(delay("Wed, 21 Oct 2015 07:28:00 GMT"), backoff);
        assert_eq!(retry_after_delay(None, backoff), backoff);
    }

    #[test]
    fn company_numbers_are_normalised() {
        assert_eq!(validate_company_number(" sc123456 ").unwrap(), "SC123456");
        assert_eq!(validate_company_number("00000006").unwrap(), "00000006");
    }

    #[test]
    fn invalid_company_numbers_are_rejected() {
        for raw in ["", "   ", "12/34", "ABCDEFGHIJKLMNOPQ", "12 34"] {
            assert!(
                matches!(
                    validate_company_number(raw),
                    Err(CompaniesHouseError::InvalidCompanyNumber(_))
                ),
                "{raw:?} should be invalid"
            );
        }
    }

    #[test]
    fn missing_key_is_rejected() {
        assert!(matches!(
            CompaniesHouseClient::new("  ", "http://localhost", Duration::from_secs(1)),
            Err(CompaniesHouseError::MissingApiKey)
        ));
        assert!(
            CompaniesHouseClient::from_config(&AppConfig::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn errors_map_to_api_statuses() {
        let err: ApiError = CompaniesHouseError::MissingApiKey.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = CompaniesHouseError::InvalidCompanyNumber("x/y".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = CompaniesHouseError::Status {
            status: 404,
            body: "not found".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(&*err.code, "UPSTREAM_ERROR");
    }

    #[test]
    fn profile_parses_registry_shape() {
        let profile = CompanyProfile::from_value(serde_json::json!({
            "company_name": "ACME LTD",
            "company_number": "01234567",
            "company_status": "active",
            "registered_office_address": {
                "address_line_1": "1 High Street",
                "locality": "London",
                "postal_code": "EC1A 1BB",
                "country": "England"
            },
            "sic_codes": ["62020", "62090"],
            "unrelated": {"ignored": true}
        }))
        .unwrap();

        assert_eq!(profile.company_name.as_deref(), Some("ACME LTD"));
        assert_eq!(profile.sic_codes.first().map(String::as_str), Some("62020"));
        let address = profile.registered_office_address.unwrap();
        assert_eq!(address.locality.as_deref(), Some("London"));
    }
}
