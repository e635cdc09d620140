//! # Tenants API Handlers
//!
//! Admin-only tenant creation and lookup.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AdminUser;
use crate::error::{ApiError, not_found};
use crate::handlers::types::TenantResponse;
use crate::repositories::{CreateTenantRequest, TenantRepository};
use crate::server::AppState;

/// Request payload for creating a new tenant
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTenantRequestDto {
    /// Unique key (lower-case letters, digits, `-` and `_`; at most 64 characters)
    #[schema(example = "acme")]
    pub key: String,
    /// Display name (max 255 characters)
    #[schema(example = "Acme Corp")]
    pub name: Option<String>,
}

/// Create a new tenant
#[utoipa::path(
    post,
    path = "/v1/tenants",
    security(("bearer_auth" = [])),
    request_body = CreateTenantRequestDto,
    responses(
        (status = 201, description = "Tenant created successfully", body = TenantResponse, headers(
            ("Location", description = "URL of the created tenant")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Insufficient permissions", body = ApiError),
        (status = 409, description = "Conflict - tenant already exists", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<CreateTenantRequestDto>, JsonRejection>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<TenantResponse>), ApiError> {
    let Json(request) = body?;
    let repo = TenantRepository::new(&state.db);
    let tenant = repo
        .create(CreateTenantRequest {
            key: request.key,
            name: request.name,
        })
        .await?;

    tracing::info!(tenant_id = tenant.id, created_by = admin.id, "tenant created via API");
    let location = format!("/v1/tenants/{}", tenant.id);
    Ok((
        StatusCode::CREATED,
        [("Location", location)],
        Json(tenant.into()),
    ))
}

/// List tenants
#[utoipa::path(
    get,
    path = "/v1/tenants",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tenants ordered by id", body = [TenantResponse]),
        (status = 403, description = "Insufficient permissions", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<TenantResponse>>, ApiError> {
    let tenants = TenantRepository::new(&state.db).list().await?;
    Ok(Json(tenants.into_iter().map(TenantResponse::from).collect()))
}

/// Get a tenant by ID
#[utoipa::path(
    get,
    path = "/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant", body = TenantResponse),
        (status = 403, description = "Insufficient permissions", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(tenant_id): Path<i32>,
) -> Result<Json<TenantResponse>, ApiError> {
    let tenant = TenantRepository::new(&state.db)
        .get(tenant_id)
        .await?
        .ok_or_else(|| not_found(&format!("Tenant {tenant_id} not found")))?;
    Ok(Json(tenant.into()))
}
