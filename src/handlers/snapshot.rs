//! # Snapshot Handler
//!
//! One-shot registry snapshot of a company: profile, officers, PSC and
//! filing history fetched concurrently. A part that fails is reported as
//! `null` rather than failing the whole response.

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::auth::CurrentUser;
use crate::companies_house::{CompaniesHouseError, validate_company_number};
use crate::error::ApiError;
use crate::handlers::companies_house::registry_client;
use crate::repositories::TenantRepository;
use crate::server::AppState;

const DEFAULT_TENANT: &str = "public";
const SNAPSHOT_FILINGS: u32 = 25;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SnapshotQuery {
    /// Skip the registry calls and return an empty snapshot
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotResponse {
    pub company_number: String,
    /// Caller's tenant key, `public` when unassigned
    pub tenant: String,
    pub profile: Option<Value>,
    pub officers: Option<Value>,
    pub psc: Option<Value>,
    pub filing_history: Option<Value>,
}

fn part(name: &str, number: &str, result: Result<Value, CompaniesHouseError>) -> Option<Value> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(part = name, company_number = %number, %error, "snapshot part unavailable");
            None
        }
    }
}

/// Registry snapshot of a company
#[utoipa::path(
    get,
    path = "/v1/snapshot/{number}",
    security(("bearer_auth" = [])),
    params(("number" = String, Path, description = "Company number"), SnapshotQuery),
    responses(
        (status = 200, description = "Snapshot; failed parts are null", body = SnapshotResponse),
        (status = 400, description = "Invalid company number", body = ApiError),
        (status = 503, description = "Companies House not configured", body = ApiError)
    ),
    tag = "companies-house"
)]
pub async fn company_snapshot(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    query: Result<Query<SnapshotQuery>, QueryRejection>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let Query(query) = query?;
    let number = validate_company_number(&number)?;

    let tenant = match user.tenant_id {
        Some(tenant_id) => TenantRepository::new(&state.db)
            .get(tenant_id)
            .await?
            .map(|tenant| tenant.key),
        None => None,
    }
    .unwrap_or_else(|| DEFAULT_TENANT.to_string());

    let mut snapshot = SnapshotResponse {
        company_number: number.clone(),
        tenant,
        profile: None,
        officers: None,
        psc: None,
        filing_history: None,
    };
    if query.dry_run {
        return Ok(Json(snapshot));
    }

    let client = registry_client(&state)?;
    let (profile, officers, psc, filings) = tokio::join!(
        client.company_profile(&number),
        client.officers(&number),
        client.persons_with_significant_control(&number),
        client.filing_history(&number, SNAPSHOT_FILINGS),
    );

    snapshot.profile = part("profile", &number, profile);
    snapshot.officers = part("officers", &number, officers);
    snapshot.psc = part("psc", &number, psc);
    snapshot.filing_history = part("filing_history", &number, filings);
    Ok(Json(snapshot))
}
