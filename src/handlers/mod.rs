//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the detecktiv API.

pub mod admin;
pub mod auth;
pub mod companies;
pub mod companies_house;
pub mod health;
pub mod metrics;
pub mod password;
pub mod snapshot;
pub mod tenants;
pub mod types;
pub mod users;

use crate::error::{ApiError, bad_request};
use crate::models::ServiceInfo;
use axum::response::Json;
use serde::de::DeserializeOwned;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "health"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Largest row offset a query may carry; the database binds offsets as `i64`.
pub(crate) const MAX_OFFSET: u64 = i64::MAX as u64;

/// Row offset of page `index` (zero-based), or 400 when it does not fit.
pub(crate) fn page_offset(index: u64, page_size: u64) -> Result<u64, ApiError> {
    index
        .checked_mul(page_size)
        .filter(|offset| *offset <= MAX_OFFSET)
        .ok_or_else(|| bad_request("page out of range"))
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(&format!("Invalid JSON: {e}")))
}

#[cfg(test)]
mod tests;
