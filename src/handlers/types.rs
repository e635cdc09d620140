//! # Common API Types
//!
//! Response DTOs shared across handlers and the pagination envelopes used by
//! the list endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{company, tenant, user};

/// Public view of a user; the password hash never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i32,
    #[schema(example = "analyst@example.com")]
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    #[schema(example = "analyst")]
    pub role: String,
    pub tenant_id: Option<i32>,
    pub last_login_at: Option<String>,
    /// RFC 3339 timestamp
    pub created_at: String,
    pub updated_at: String,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            role: user.role,
            tenant_id: user.tenant_id,
            last_login_at: user.last_login_at.map(|t| t.to_rfc3339()),
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantResponse {
    pub id: i32,
    #[schema(example = "acme")]
    pub key: String,
    pub name: Option<String>,
    pub created_at: String,
}

impl From<tenant::Model> for TenantResponse {
    fn from(tenant: tenant::Model) -> Self {
        Self {
            id: tenant.id,
            key: tenant.key,
            name: tenant.name,
            created_at: tenant.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CompanyResponse {
    pub id: i32,
    pub tenant_id: Option<i32>,
    #[schema(example = "Acme Widgets Ltd")]
    pub name: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub country: String,
    pub companies_house_number: Option<String>,
    pub companies_house_status: Option<String>,
    pub industry: Option<String>,
    pub sic_code: Option<String>,
    pub employee_count: Option<i32>,
    pub annual_revenue: Option<i64>,
    pub data_source: String,
    pub last_updated_from_source: Option<String>,
    pub is_prospect: bool,
    pub prospect_stage: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<company::Model> for CompanyResponse {
    fn from(company: company::Model) -> Self {
        Self {
            id: company.id,
            tenant_id: company.tenant_id,
            name: company.name,
            website: company.website,
            email: company.email,
            phone: company.phone,
            address_line1: company.address_line1,
            address_line2: company.address_line2,
            city: company.city,
            county: company.county,
            postcode: company.postcode,
            country: company.country,
            companies_house_number: company.companies_house_number,
            companies_house_status: company.companies_house_status,
            industry: company.industry,
            sic_code: company.sic_code,
            employee_count: company.employee_count,
            annual_revenue: company.annual_revenue,
            data_source: company.data_source,
            last_updated_from_source: company.last_updated_from_source.map(|t| t.to_rfc3339()),
            is_prospect: company.is_prospect,
            prospect_stage: company.prospect_stage,
            notes: company.notes,
            created_at: company.created_at.to_rfc3339(),
            updated_at: company.updated_at.to_rfc3339(),
        }
    }
}

/// Page of users for `GET /v1/users/paged`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PagedUsers {
    pub items: Vec<UserResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Page of companies for `GET /v1/companies`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CompanyListResponse {
    pub companies: Vec<CompanyResponse>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl CompanyListResponse {
    pub fn new(companies: Vec<CompanyResponse>, total_count: u64, page: u64, page_size: u64) -> Self {
        Self {
            companies,
            total_count,
            page,
            page_size,
            total_pages: total_count.div_ceil(page_size.max(1)),
        }
    }
}
