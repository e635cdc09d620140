//! Company entity model
//!
//! A UK-focused company record: contact details, registered address,
//! Companies House data and prospect pipeline state.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

pub const DATA_SOURCES: &[&str] = &["manual", "companies_house", "scraped", "api", "import"];
pub const COUNTRIES: &[&str] = &["GB", "IE", "US", "CA", "AU", "NZ"];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "companies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tenant_id: Option<i32>,
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
    /// One of [`DATA_SOURCES`]
    pub data_source: String,
    pub last_updated_from_source: Option<DateTimeWithTimeZone>,
    pub is_prospect: bool,
    pub prospect_stage: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id",
        on_delete = "SetNull"
    )]
    Tenant,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
