//! # Companies House Pass-through Handlers
//!
//! Authenticated proxies to the Companies House API. Registry JSON is
//! returned unchanged.

use axum::{
    extract::{
        Path, Query, State,
        rejection::QueryRejection,
    },
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::IntoParams;

use crate::auth::CurrentUser;
use crate::companies_house::{CompaniesHouseClient, CompaniesHouseError, validate_company_number};
use crate::error::{ApiError, bad_request};
use crate::server::AppState;

/// The configured client, or 503 when no API key is set.
pub(crate) fn registry_client(state: &AppState) -> Result<&CompaniesHouseClient, ApiError> {
    state
        .companies_house
        .as_ref()
        .ok_or_else(|| CompaniesHouseError::MissingApiKey.into())
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RegistrySearchQuery {
    /// Search text
    pub q: String,
    /// 1..=100, default 20
    pub items_per_page: Option<u32>,
    /// Zero-based offset, default 0
    pub start_index: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FilingHistoryQuery {
    /// 1..=100, default 25
    pub items_per_page: Option<u32>,
}

/// Search the Companies House register
#[utoipa::path(
    get,
    path = "/v1/companies-house/companies/search",
    security(("bearer_auth" = [])),
    params(RegistrySearchQuery),
    responses(
        (status = 200, description = "Registry search results"),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn search(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<RegistrySearchQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let q = query.q.trim();
    if q.is_empty() {
        return Err(bad_request("q cannot be empty"));
    }
    let items_per_page = query.items_per_page.unwrap_or(20);
    if !(1..=100).contains(&items_per_page) {
        return Err(bad_request("items_per_page must be between 1 and 100"));
    }

    let client = registry_client(&state)?;
    let results = client
        .search_companies(q, items_per_page, query.start_index.unwrap_or(0))
        .await?;
    Ok(Json(results))
}

/// Company profile
#[utoipa::path(
    get,
    path = "/v1/companies-house/company/{number}",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number")),
    responses(
        (status = 200, description = "Company profile"),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn profile(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let number = validate_company_number(&number)?;
    Ok(Json(registry_client(&state)?.company_profile(&number).await?))
}

/// Company officers
#[utoipa::path(
    get,
    path = "/v1/companies-house/company/{number}/officers",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number")),
    responses(
        (status = 200, description = "Officers"),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn officers(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let number = validate_company_number(&number)?;
    Ok(Json(registry_client(&state)?.officers(&number).await?))
}

/// Filing history
#[utoipa::path(
    get,
    path = "/v1/companies-house/company/{number}/filing-history",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number"), FilingHistoryQuery),
    responses(
        (status = 200, description = "Filing history"),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn filing_history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
    query: Result<Query<FilingHistoryQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let number = validate_company_number(&number)?;
    let items_per_page = query.items_per_page.unwrap_or(25);
    if !(1..=100).contains(&items_per_page) {
        return Err(bad_request("items_per_page must be between 1 and 100"));
    }
    Ok(Json(
        registry_client(&state)?
            .filing_history(&number, items_per_page)
            .await?,
    ))
}

/// Persons with significant control
#[utoipa::path(
    get,
    path = "/v1/companies-house/company/{number}/persons-with-significant-control",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number")),
    responses(
        (status = 200, description = "PSC register"),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn persons_with_significant_control(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let number = validate_company_number(&number)?;
    Ok(Json(
        registry_client(&state)?
            .persons_with_significant_control(&number)
            .await?,
    ))
}

/// Registered charges
#[utoipa::path(
    get,
    path = "/v1/companies-house/company/{number}/charges",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number")),
    responses(
        (status = 200, description = "Charges"),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn charges(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let number = validate_company_number(&number)?;
    Ok(Json(registry_client(&state)?.charges(&number).await?))
}
