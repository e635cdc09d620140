//! # User Handlers
//!
//! Admin user management plus self-service reads and updates.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{AdminUser, CurrentUser};
use crate::error::{ApiError, bad_request, forbidden, not_found};
use crate::handlers::types::{PagedUsers, UserResponse};
use crate::handlers::{MAX_OFFSET, page_offset};
use crate::repositories::{NewUser, UserChanges, UserRepository};
use crate::server::AppState;

pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    /// Max rows to return (1..=1000, default 50)
    pub limit: Option<u64>,
    /// Rows to skip
    pub offset: Option<u64>,
    /// Case-insensitive email/full name search
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PagedUsersQuery {
    /// Zero-based page
    pub page: Option<u64>,
    /// Page size (1..=200, default 20)
    pub page_size: Option<u64>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "analyst@example.com")]
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    /// `admin`, `analyst` or `member`; defaults to `analyst`
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub tenant_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub tenant_id: Option<i32>,
}

impl UpdateUserRequest {
    /// Fields only an administrator may change.
    fn privileged_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.role.is_some() {
            fields.push("role");
        }
        if self.is_active.is_some() {
            fields.push("is_active");
        }
        if self.is_superuser.is_some() {
            fields.push("is_superuser");
        }
        if self.tenant_id.is_some() {
            fields.push("tenant_id");
        }
        fields
    }
}

pub(crate) fn check_password_length(password: &str) -> Result<(), ApiError> {
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(bad_request(&format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn search_term(q: &Option<String>) -> Option<&str> {
    q.as_deref().map(str::trim).filter(|q| !q.is_empty())
}

/// List users, newest first
#[utoipa::path(
    get,
    path = "/v1/users",
    security(("bearer_auth" = [])),
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Users", body = [UserResponse]),
        (status = 400, description = "Invalid paging parameters", body = ApiError),
        (status = 401, description = "Not authenticated", body = ApiError),
        (status = 403, description = "Admin privileges required", body = ApiError)
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(50);
    if !(1..=1000).contains(&limit) {
        return Err(bad_request("limit must be between 1 and 1000"));
    }
    let offset = query.offset.unwrap_or(0);
    if offset > MAX_OFFSET {
        return Err(bad_request("offset out of range"));
    }

    let repo = UserRepository::new(&state.db, &state.hasher);
    let users = repo
        .list(limit, offset, search_term(&query.q))
        .await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Page through users
#[utoipa::path(
    get,
    path = "/v1/users/paged",
    security(("bearer_auth" = [])),
    params(PagedUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = PagedUsers),
        (status = 400, description = "Invalid paging parameters", body = ApiError),
        (status = 403, description = "Admin privileges required", body = ApiError)
    ),
    tag = "users"
)]
pub async fn list_users_paged(
    State(state): State<AppState>,
    _admin: AdminUser,
    query: Result<Query<PagedUsersQuery>, QueryRejection>,
) -> Result<Json<PagedUsers>, ApiError> {
    let Query(query) = query?;
    let page = query.page.unwrap_or(0);
    let page_size = query.page_size.unwrap_or(20);
    if !(1..=200).contains(&page_size) {
        return Err(bad_request("page_size must be between 1 and 200"));
    }
    page_offset(page, page_size)?;

    let repo = UserRepository::new(&state.db, &state.hasher);
    let (items, total) = repo
        .list_paged(page, page_size, search_term(&query.q))
        .await?;
    Ok(Json(PagedUsers {
        items: items.into_iter().map(UserResponse::from).collect(),
        total,
        page,
        page_size,
    }))
}

/// Create a user
#[utoipa::path(
    post,
    path = "/v1/users",
    security(("bearer_auth" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Admin privileges required", body = ApiError),
        (status = 409, description = "Email already exists", body = ApiError)
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(request) = body?;
    check_password_length(&request.password)?;

    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo
        .create(NewUser {
            email: request.email,
            password: request.password,
            full_name: request.full_name,
            role: request.role,
            is_active: request.is_active,
            is_superuser: request.is_superuser,
            tenant_id: request.tenant_id,
        })
        .await?;

    tracing::info!(user_id = user.id, created_by = admin.id, "user created via API");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// The authenticated user
#[utoipa::path(
    get,
    path = "/v1/users/me",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ApiError)
    ),
    tag = "users"
)]
pub async fn read_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

/// Look a user up by email
#[utoipa::path(
    get,
    path = "/v1/users/by-email",
    security(("bearer_auth" = [])),
    params(EmailQuery),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Admin privileges required", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn get_user_by_email(
    State(state): State<AppState>,
    _admin: AdminUser,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Query(query) = query?;
    let email = query.email.trim();
    if email.len() < 3 || email.len() > 255 {
        return Err(bad_request("email must be between 3 and 255 characters"));
    }

    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo
        .get_by_email(email)
        .await?
        .ok_or_else(|| not_found("User not found"))?;
    Ok(Json(user.into()))
}

/// Get a user by id (self or admin)
#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Not allowed", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<i32>,
) -> Result<Json<UserResponse>, ApiError> {
    let repo = UserRepository::new(&state.db, &state.hasher);
    let user = repo
        .get(user_id)
        .await?
        .ok_or_else(|| not_found("User not found"))?;

    if !caller.is_admin() && caller.id != user_id {
        return Err(forbidden(Some("Not allowed")));
    }
    Ok(Json(user.into()))
}

/// Update a user
///
/// Non-admins may change their own email, full name and password. Role,
/// activity, superuser and tenant changes require an administrator.
#[utoipa::path(
    patch,
    path = "/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Not allowed", body = ApiError),
        (status = 404, description = "User not found", body = ApiError),
        (status = 409, description = "Email already exists", body = ApiError)
    ),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<i32>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(request) = body?;
    let repo = UserRepository::new(&state.db, &state.hasher);
    if repo.get(user_id).await?.is_none() {
        return Err(not_found("User not found"));
    }

    let is_admin = caller.is_admin();
    if !is_admin && caller.id != user_id {
        return Err(forbidden(Some("Not allowed")));
    }
    if !is_admin {
        let fields = request.privileged_fields();
        if !fields.is_empty() {
            return Err(forbidden(Some(&format!(
                "Insufficient privileges to update: {}",
                fields.join(", ")
            )))
            .with_details(json!({ "fields": fields })));
        }
    }
    if let Some(password) = &request.password {
        check_password_length(password)?;
    }

    let allow_role_change = is_admin && request.role.is_some();
    let updated = repo
        .update(
            user_id,
            UserChanges {
                email: request.email,
                full_name: request.full_name,
                password: request.password,
                role: request.role,
                is_active: request.is_active,
                is_superuser: request.is_superuser,
                tenant_id: request.tenant_id,
            },
            allow_role_change,
        )
        .await?;
    Ok(Json(updated.into()))
}

/// Deactivate (soft delete) a user
///
/// Always answers 204, including for unknown or already inactive users.
#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 204, description = "User deactivated"),
        (status = 403, description = "Admin privileges required", body = ApiError)
    ),
    tag = "users"
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let repo = UserRepository::new(&state.db, &state.hasher);
    if repo.deactivate(user_id).await? {
        tracing::info!(user_id, deactivated_by = admin.id, "user deactivated via API");
    }
    Ok(StatusCode::NO_CONTENT)
}
