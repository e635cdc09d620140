//! # Company Handlers
//!
//! CRUD, search, prospect pipeline and Companies House sync for company
//! records. Every route requires an authenticated user; delete requires an
//! administrator.

use axum::{
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{AdminUser, CurrentUser};
use crate::companies_house::{CompanyProfile, validate_company_number};
use crate::error::{ApiError, bad_request, not_found};
use crate::handlers::companies_house::registry_client;
use crate::handlers::{optional_json, page_offset};
use crate::handlers::types::{CompanyListResponse, CompanyResponse};
use crate::models::company::DATA_SOURCES;
use crate::repositories::company::{MAX_SEARCH_LIMIT, is_known_data_source};
use crate::repositories::{
    CompanyCreate, CompanyFilter, CompanyOrder, CompanyRepository, CompanyUpdate, ListOptions,
};
use crate::server::AppState;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCompaniesQuery {
    /// Name contains (case-insensitive)
    pub name: Option<String>,
    pub country: Option<String>,
    /// Industry contains (case-insensitive)
    pub industry: Option<String>,
    /// Postcode prefix
    pub postcode: Option<String>,
    pub is_prospect: Option<bool>,
    pub has_companies_house_data: Option<bool>,
    pub data_source: Option<String>,
    /// One-based page (default 1)
    pub page: Option<u64>,
    /// Page size (1..=100, default 20)
    pub page_size: Option<u64>,
    /// `id`, `name`, `created_at` or `postcode`
    pub order_by: Option<CompanyOrder>,
    /// `asc` (default) or `desc`
    pub order: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub query: String,
    /// 1..=100, default 50
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProspectRequest {
    /// Pipeline stage, defaults to `lead`
    pub stage: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncRequest {
    /// Overrides the stored Companies House number
    pub company_number: Option<String>,
}

impl ListCompaniesQuery {
    fn into_options(self) -> Result<(ListOptions, u64, u64), ApiError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(bad_request("page must be at least 1"));
        }
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(bad_request(&format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let descending = match self.order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(_) => return Err(bad_request("order must be 'asc' or 'desc'")),
        };
        if let Some(source) = self.data_source.as_deref()
            && !is_known_data_source(&source.to_lowercase())
        {
            return Err(bad_request(&format!(
                "data_source must be one of {}",
                DATA_SOURCES.join(", ")
            )));
        }

        let options = ListOptions {
            filter: CompanyFilter {
                name: self.name,
                country: self.country,
                industry: self.industry,
                postcode: self.postcode,
                is_prospect: self.is_prospect,
                has_companies_house_data: self.has_companies_house_data,
                data_source: self.data_source,
            },
            order_by: self.order_by.unwrap_or_default(),
            descending,
            limit: page_size,
            offset: page_offset(page - 1, page_size)?,
        };
        Ok((options, page, page_size))
    }
}

fn company_list(companies: Vec<crate::models::company::Model>) -> Vec<CompanyResponse> {
    companies.into_iter().map(CompanyResponse::from).collect()
}

/// List companies with filters and pagination
#[utoipa::path(
    get,
    path = "/v1/companies",
    security(("bearer_auth" = [])),
    params(ListCompaniesQuery),
    responses(
        (status = 200, description = "Page of companies", body = CompanyListResponse),
        (status = 400, description = "Invalid filter or paging parameters", body = ApiError),
        (status = 401, description = "Not authenticated", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn list_companies(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<ListCompaniesQuery>, QueryRejection>,
) -> Result<Json<CompanyListResponse>, ApiError> {
    let Query(query) = query?;
    let (options, page, page_size) = query.into_options()?;

    let (companies, total) = CompanyRepository::new(&state.db).list(options).await?;
    Ok(Json(CompanyListResponse::new(
        company_list(companies),
        total,
        page,
        page_size,
    )))
}

/// Create a company
#[utoipa::path(
    post,
    path = "/v1/companies",
    security(("bearer_auth" = [])),
    request_body = CompanyCreate,
    responses(
        (status = 201, description = "Company created", body = CompanyResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Company name already exists", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn create_company(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CompanyCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<CompanyResponse>), ApiError> {
    let Json(mut request) = body?;
    if request.tenant_id.is_none() {
        request.tenant_id = user.tenant_id;
    }

    let company = CompanyRepository::new(&state.db).create(request).await?;
    tracing::info!(company_id = company.id, user_id = user.id, "company created via API");
    Ok((StatusCode::CREATED, Json(company.into())))
}

/// Search companies by name, website or email
#[utoipa::path(
    get,
    path = "/v1/companies/search",
    security(("bearer_auth" = [])),
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching companies", body = [CompanyResponse]),
        (status = 400, description = "Empty query or invalid limit", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn search_companies(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<CompanyResponse>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(50);
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(bad_request(&format!(
            "limit must be between 1 and {MAX_SEARCH_LIMIT}"
        )));
    }

    let companies = CompanyRepository::new(&state.db)
        .search(&query.query, limit)
        .await?;
    Ok(Json(company_list(companies)))
}

/// Companies whose postcode starts with a prefix
#[utoipa::path(
    get,
    path = "/v1/companies/postcode/{prefix}",
    security(("bearer_auth" = [])),
    params(("prefix" = String, Path, description = "Postcode prefix, e.g. `EC1`")),
    responses((status = 200, description = "Companies ordered by postcode", body = [CompanyResponse])),
    tag = "companies"
)]
pub async fn companies_by_postcode(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(prefix): Path<String>,
) -> Result<Json<Vec<CompanyResponse>>, ApiError> {
    let companies = CompanyRepository::new(&state.db).by_postcode(&prefix).await?;
    Ok(Json(company_list(companies)))
}

/// Get a company by id
#[utoipa::path(
    get,
    path = "/v1/companies/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Company id")),
    responses(
        (status = 200, description = "Company", body = CompanyResponse),
        (status = 404, description = "Company not found", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn get_company(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(company_id): Path<i32>,
) -> Result<Json<CompanyResponse>, ApiError> {
    let company = CompanyRepository::new(&state.db)
        .get(company_id)
        .await?
        .ok_or_else(|| not_found(&format!("Company with ID {company_id} not found")))?;
    Ok(Json(company.into()))
}

/// Partially update a company
#[utoipa::path(
    patch,
    path = "/v1/companies/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Company id")),
    request_body = CompanyUpdate,
    responses(
        (status = 200, description = "Updated company", body = CompanyResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Company not found", body = ApiError),
        (status = 409, description = "Company name already exists", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn update_company(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(company_id): Path<i32>,
    body: Result<Json<CompanyUpdate>, JsonRejection>,
) -> Result<Json<CompanyResponse>, ApiError> {
    let Json(changes) = body?;
    let company = CompanyRepository::new(&state.db)
        .update(company_id, changes)
        .await?;
    Ok(Json(company.into()))
}

/// Delete a company (admin)
#[utoipa::path(
    delete,
    path = "/v1/companies/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Company id")),
    responses(
        (status = 204, description = "Company deleted"),
        (status = 403, description = "Admin privileges required", body = ApiError),
        (status = 404, description = "Company not found", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn delete_company(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(company_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    CompanyRepository::new(&state.db).delete(company_id).await?;
    tracing::info!(company_id, deleted_by = admin.id, "company deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// Move a company into the prospect pipeline
#[utoipa::path(
    post,
    path = "/v1/companies/{id}/prospect",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Company id")),
    request_body(content = ProspectRequest, description = "Optional; the stage defaults to `lead`"),
    responses(
        (status = 200, description = "Company marked as prospect", body = CompanyResponse),
        (status = 404, description = "Company not found", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn mark_prospect(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(company_id): Path<i32>,
    body: Bytes,
) -> Result<Json<CompanyResponse>, ApiError> {
    let request: ProspectRequest = optional_json(&body)?;
    let company = CompanyRepository::new(&state.db)
        .mark_as_prospect(company_id, request.stage.as_deref())
        .await?;
    Ok(Json(company.into()))
}

/// Refresh a company from its Companies House profile
#[utoipa::path(
    post,
    path = "/v1/companies/{id}/companies-house-sync",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Company id")),
    request_body(content = SyncRequest, description = "Optional company number override"),
    responses(
        (status = 200, description = "Company updated from the registry", body = CompanyResponse),
        (status = 400, description = "No or invalid company number", body = ApiError),
        (status = 404, description = "Company not found", body = ApiError),
        (status = 502, description = "Registry failure", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies"
)]
pub async fn sync_from_companies_house(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(company_id): Path<i32>,
    body: Bytes,
) -> Result<Json<CompanyResponse>, ApiError> {
    let request: SyncRequest = optional_json(&body)?;
    let repo = CompanyRepository::new(&state.db);
    let company = repo
        .get(company_id)
        .await?
        .ok_or_else(|| not_found(&format!("Company with ID {company_id} not found")))?;

    let number = request
        .company_number
        .or(company.companies_house_number)
        .ok_or_else(|| bad_request("Company has no Companies House number"))?;
    let number = validate_company_number(&number)?;

    let client = registry_client(&state)?;
    let profile = CompanyProfile::from_value(client.company_profile(&number).await?)?;
    let updated = repo.apply_companies_house_profile(company_id, &profile).await?;

    tracing::info!(company_id, user_id = user.id, company_number = %number, "company synced from Companies House");
    Ok(Json(updated.into()))
}
