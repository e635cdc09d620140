//! # Company Repository
//!
//! CRUD, filtering and search over companies, plus the prospect pipeline and
//! Companies House enrichment.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Func},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::companies_house::CompanyProfile;
use crate::error::RepositoryError;
use crate::models::company::{
    self, ActiveModel as CompanyActiveModel, COUNTRIES, DATA_SOURCES, Entity as Company,
    Model as CompanyModel,
};
use crate::repositories::user::validate_email;
use crate::repositories::{like_contains, like_prefix};

pub const MAX_SEARCH_LIMIT: u64 = 100;
pub const DEFAULT_PROSPECT_STAGE: &str = "lead";

/// Payload for creating a company.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CompanyCreate {
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
    /// ISO country code, defaults to `GB`
    pub country: Option<String>,
    pub industry: Option<String>,
    pub sic_code: Option<String>,
    pub employee_count: Option<i32>,
    pub annual_revenue: Option<i64>,
    pub companies_house_number: Option<String>,
    pub notes: Option<String>,
    pub tenant_id: Option<i32>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CompanyUpdate {
    pub name: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub sic_code: Option<String>,
    pub employee_count: Option<i32>,
    pub annual_revenue: Option<i64>,
    pub companies_house_number: Option<String>,
    pub notes: Option<String>,
    pub is_prospect: Option<bool>,
    pub prospect_stage: Option<String>,
}

/// Filters for company listings.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CompanyFilter {
    /// Name contains (case-insensitive)
    pub name: Option<String>,
    /// Exact country code
    pub country: Option<String>,
    /// Industry contains (case-insensitive)
    pub industry: Option<String>,
    /// Postcode prefix
    pub postcode: Option<String>,
    pub is_prospect: Option<bool>,
    /// Whether a Companies House number is present
    pub has_companies_house_data: Option<bool>,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompanyOrder {
    #[default]
    Id,
    Name,
    CreatedAt,
    Postcode,
}

impl CompanyOrder {
    fn column(self) -> company::Column {
        match self {
            CompanyOrder::Id => company::Column::Id,
            CompanyOrder::Name => company::Column::Name,
            CompanyOrder::CreatedAt => company::Column::CreatedAt,
            CompanyOrder::Postcode => company::Column::Postcode,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filter: CompanyFilter,
    pub order_by: CompanyOrder,
    pub descending: bool,
    pub limit: u64,
    pub offset: u64,
}

fn lower_contains(column: company::Column, needle: &str) -> sea_orm::sea_query::SimpleExpr {
    Expr::expr(Func::lower(Expr::col(column))).like(like_contains(&needle.to_lowercase()))
}

fn upper_prefix(column: company::Column, prefix: &str) -> sea_orm::sea_query::SimpleExpr {
    Expr::expr(Func::upper(Expr::col(column))).like(like_prefix(&prefix.trim().to_uppercase()))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl CompanyFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(name) = non_blank(&self.name) {
            condition = condition.add(lower_contains(company::Column::Name, name));
        }
        if let Some(country) = non_blank(&self.country) {
            condition = condition.add(company::Column::Country.eq(country.to_uppercase()));
        }
        if let Some(industry) = non_blank(&self.industry) {
            condition = condition.add(lower_contains(company::Column::Industry, industry));
        }
        if let Some(postcode) = non_blank(&self.postcode) {
            condition = condition.add(upper_prefix(company::Column::Postcode, postcode));
        }
        if let Some(is_prospect) = self.is_prospect {
            condition = condition.add(company::Column::IsProspect.eq(is_prospect));
        }
        match self.has_companies_house_data {
            Some(true) => {
                condition = condition.add(company::Column::CompaniesHouseNumber.is_not_null())
            }
            Some(false) => {
                condition = condition.add(company::Column::CompaniesHouseNumber.is_null())
            }
            None => {}
        }
        if let Some(source) = non_blank(&self.data_source) {
            condition = condition.add(company::Column::DataSource.eq(source.to_lowercase()));
        }
        condition
    }
}

// Field normalisation shared by create and update.

fn optional_text(
    value: Option<String>,
    field: &str,
    max: usize,
) -> Result<Option<String>, RepositoryError> {
    let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    if value.as_ref().is_some_and(|v| v.chars().count() > max) {
        return Err(RepositoryError::validation_error(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(value)
}

fn clean_name(name: &str) -> Result<String, RepositoryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RepositoryError::validation_error(
            "Company name cannot be empty",
        ));
    }
    if name.chars().count() > 255 {
        return Err(RepositoryError::validation_error(
            "Company name cannot exceed 255 characters",
        ));
    }
    Ok(name.to_string())
}

/// Adds `https://` when no scheme is present and requires a host.
fn clean_website(website: Option<String>) -> Result<Option<String>, RepositoryError> {
    let Some(raw) = optional_text(website, "website", 500)? else {
        return Ok(None);
    };
    let candidate = if raw.contains("://") {
        raw
    } else {
        format!("https://{raw}")
    };
    let parsed = url::Url::parse(&candidate)
        .map_err(|_| RepositoryError::validation_error("Invalid website URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(RepositoryError::validation_error("Invalid website URL"));
    }
    Ok(Some(candidate))
}

fn clean_company_email(email: Option<String>) -> Result<Option<String>, RepositoryError> {
    let Some(email) = optional_text(email, "email", 255)? else {
        return Ok(None);
    };
    let email = email.to_lowercase();
    validate_email(&email)?;
    Ok(Some(email))
}

/// Keeps digits and `+- ()`; at least 7 characters must remain.
fn clean_phone(phone: Option<String>) -> Result<Option<String>, RepositoryError> {
    let Some(raw) = optional_text(phone, "phone", 50)? else {
        return Ok(None);
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || "+- ()".contains(*c))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.len() < 7 {
        return Err(RepositoryError::validation_error("Phone number too short"));
    }
    Ok(Some(cleaned))
}

fn clean_postcode(postcode: Option<String>) -> Result<Option<String>, RepositoryError> {
    Ok(optional_text(postcode, "postcode", 20)?.map(|p| p.to_uppercase()))
}

fn clean_country(country: &str) -> Result<String, RepositoryError> {
    let country = country.trim().to_uppercase();
    if COUNTRIES.contains(&country.as_str()) {
        Ok(country)
    } else {
        Err(RepositoryError::validation_error(format!(
            "Country must be one of {}",
            COUNTRIES.join(", ")
        )))
    }
}

fn non_negative<T: PartialOrd + Default>(
    value: Option<T>,
    field: &str,
) -> Result<Option<T>, RepositoryError> {
    if value.as_ref().is_some_and(|v| *v < T::default()) {
        return Err(RepositoryError::validation_error(format!(
            "{field} cannot be negative"
        )));
    }
    Ok(value)
}

/// Maps registry country names onto the supported ISO codes.
fn country_from_registry(country: &str) -> Option<&'static str> {
    match country.trim().to_lowercase().as_str() {
        "england" | "wales" | "scotland" | "northern ireland" | "united kingdom" | "uk"
        | "england and wales" | "great britain" | "gb" => Some("GB"),
        "ireland" | "ie" => Some("IE"),
        _ => None,
    }
}

fn truncated(value: Option<String>, max: usize) -> Option<String> {
    value
        .map(|v| v.trim().chars().take(max).collect::<String>())
        .filter(|v| !v.is_empty())
}

/// Repository for Company database operations
pub struct CompanyRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> CompanyRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    async fn ensure_name_available(
        &self,
        name: &str,
        exclude_id: Option<i32>,
    ) -> Result<(), RepositoryError> {
        if let Some(existing) = self.get_by_name(name).await? {
            if Some(existing.id) != exclude_id {
                return Err(RepositoryError::conflict(format!(
                    "Company with name '{name}' already exists"
                )));
            }
        }
        Ok(())
    }

    pub async fn create(&self, input: CompanyCreate) -> Result<CompanyModel, RepositoryError> {
        let name = clean_name(&input.name)?;
        let country = clean_country(input.country.as_deref().unwrap_or("GB"))?;
        let website = clean_website(input.website)?;
        let email = clean_company_email(input.email)?;
        let phone = clean_phone(input.phone)?;
        let postcode = clean_postcode(input.postcode)?;
        let employee_count = non_negative(input.employee_count, "employee_count")?;
        let annual_revenue = non_negative(input.annual_revenue, "annual_revenue")?;

        self.ensure_name_available(&name, None).await?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let company = CompanyActiveModel {
            tenant_id: Set(input.tenant_id),
            name: Set(name),
            website: Set(website),
            email: Set(email),
            phone: Set(phone),
            address_line1: Set(optional_text(input.address_line1, "address_line1", 255)?),
            address_line2: Set(optional_text(input.address_line2, "address_line2", 255)?),
            city: Set(optional_text(input.city, "city", 100)?),
            county: Set(optional_text(input.county, "county", 100)?),
            postcode: Set(postcode),
            country: Set(country),
            companies_house_number: Set(optional_text(
                input.companies_house_number,
                "companies_house_number",
                20,
            )?
            .map(|n| n.to_uppercase())),
            companies_house_status: Set(None),
            industry: Set(optional_text(input.industry, "industry", 100)?),
            sic_code: Set(optional_text(input.sic_code, "sic_code", 10)?),
            employee_count: Set(employee_count),
            annual_revenue: Set(annual_revenue),
            data_source: Set("manual".to_string()),
            last_updated_from_source: Set(None),
            is_prospect: Set(false),
            prospect_stage: Set(None),
            notes: Set(optional_text(input.notes, "notes", usize::MAX)?),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db)
        .await?;

        tracing::info!(company_id = company.id, name = %company.name, "company created");
        Ok(company)
    }

    pub async fn get(&self, company_id: i32) -> Result<Option<CompanyModel>, RepositoryError> {
        Ok(Company::find_by_id(company_id).one(self.db).await?)
    }

    async fn require(&self, company_id: i32) -> Result<CompanyModel, RepositoryError> {
        self.get(company_id).await?.ok_or_else(|| {
            RepositoryError::not_found(format!("Company with ID {company_id} not found"))
        })
    }

    /// Case-insensitive exact name lookup.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<CompanyModel>, RepositoryError> {
        Ok(Company::find()
            .filter(Expr::expr(Func::lower(Expr::col(company::Column::Name))).eq(name.trim().to_lowercase()))
            .one(self.db)
            .await?)
    }

    pub async fn get_by_companies_house_number(
        &self,
        number: &str,
    ) -> Result<Option<CompanyModel>, RepositoryError> {
        Ok(Company::find()
            .filter(company::Column::CompaniesHouseNumber.eq(number.trim().to_uppercase()))
            .one(self.db)
            .await?)
    }

    pub async fn update(
        &self,
        company_id: i32,
        changes: CompanyUpdate,
    ) -> Result<CompanyModel, RepositoryError> {
        let current = self.require(company_id).await?;
        let mut active = current.into_active_model();

        if let Some(name) = changes.name {
            let name = clean_name(&name)?;
            self.ensure_name_available(&name, Some(company_id)).await?;
            active.name = Set(name);
        }
        if changes.website.is_some() {
            active.website = Set(clean_website(changes.website)?);
        }
        if changes.email.is_some() {
            active.email = Set(clean_company_email(changes.email)?);
        }
        if changes.phone.is_some() {
            active.phone = Set(clean_phone(changes.phone)?);
        }
        if changes.address_line1.is_some() {
            active.address_line1 = Set(optional_text(changes.address_line1, "address_line1", 255)?);
        }
        if changes.address_line2.is_some() {
            active.address_line2 = Set(optional_text(changes.address_line2, "address_line2", 255)?);
        }
        if changes.city.is_some() {
            active.city = Set(optional_text(changes.city, "city", 100)?);
        }
        if changes.county.is_some() {
            active.county = Set(optional_text(changes.county, "county", 100)?);
        }
        if changes.postcode.is_some() {
            active.postcode = Set(clean_postcode(changes.postcode)?);
        }
        if let Some(country) = changes.country {
            active.country = Set(clean_country(&country)?);
        }
        if changes.industry.is_some() {
            active.industry = Set(optional_text(changes.industry, "industry", 100)?);
        }
        if changes.sic_code.is_some() {
            active.sic_code = Set(optional_text(changes.sic_code, "sic_code", 10)?);
        }
        if changes.employee_count.is_some() {
            active.employee_count = Set(non_negative(changes.employee_count, "employee_count")?);
        }
        if changes.annual_revenue.is_some() {
            active.annual_revenue = Set(non_negative(changes.annual_revenue, "annual_revenue")?);
        }
        if changes.companies_house_number.is_some() {
            active.companies_house_number = Set(optional_text(
                changes.companies_house_number,
                "companies_house_number",
                20,
            )?
            .map(|n| n.to_uppercase()));
        }
        if changes.notes.is_some() {
            active.notes = Set(optional_text(changes.notes, "notes", usize::MAX)?);
        }
        if let Some(is_prospect) = changes.is_prospect {
            active.is_prospect = Set(is_prospect);
        }
        if changes.prospect_stage.is_some() {
            active.prospect_stage = Set(optional_text(changes.prospect_stage, "prospect_stage", 50)?);
        }

        active.updated_at = Set(Utc::now().into());
        let updated = active.update(self.db).await?;
        tracing::info!(company_id = updated.id, "company updated");
        Ok(updated)
    }

    pub async fn delete(&self, company_id: i32) -> Result<(), RepositoryError> {
        let company = self.require(company_id).await?;
        let name = company.name.clone();
        company.delete(self.db).await?;
        tracing::info!(company_id, name = %name, "company deleted");
        Ok(())
    }

    /// Filtered, ordered page of companies plus the total match count.
    pub async fn list(&self, options: ListOptions) -> Result<(Vec<CompanyModel>, u64), RepositoryError> {
        let query = Company::find().filter(options.filter.condition());
        let total = query.clone().count(self.db).await?;

        let column = options.order_by.column();
        let query = if options.descending {
            query.order_by_desc(column)
        } else {
            query.order_by_asc(column)
        };

        let companies = query
            .limit(options.limit)
            .offset(options.offset)
            .all(self.db)
            .await?;
        Ok((companies, total))
    }

    /// Name, website or email contains `term` (case-insensitive).
    pub async fn search(&self, term: &str, limit: u64) -> Result<Vec<CompanyModel>, RepositoryError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(RepositoryError::validation_error("Search query cannot be empty"));
        }
        Ok(Company::find()
            .filter(
                Condition::any()
                    .add(lower_contains(company::Column::Name, term))
                    .add(lower_contains(company::Column::Website, term))
                    .add(lower_contains(company::Column::Email, term)),
            )
            .order_by_asc(company::Column::Name)
            .limit(limit.clamp(1, MAX_SEARCH_LIMIT))
            .all(self.db)
            .await?)
    }

    /// Companies whose postcode starts with `prefix`, by postcode then name.
    pub async fn by_postcode(&self, prefix: &str) -> Result<Vec<CompanyModel>, RepositoryError> {
        if prefix.trim().is_empty() {
            return Err(RepositoryError::validation_error("Postcode prefix cannot be empty"));
        }
        Ok(Company::find()
            .filter(upper_prefix(company::Column::Postcode, prefix))
            .order_by_asc(company::Column::Postcode)
            .order_by_asc(company::Column::Name)
            .all(self.db)
            .await?)
    }

    pub async fn mark_as_prospect(
        &self,
        company_id: i32,
        stage: Option<&str>,
    ) -> Result<CompanyModel, RepositoryError> {
        let stage = optional_text(stage.map(str::to_string), "stage", 50)?
            .unwrap_or_else(|| DEFAULT_PROSPECT_STAGE.to_string());
        let company = self.require(company_id).await?;

        let mut active = company.into_active_model();
        active.is_prospect = Set(true);
        active.prospect_stage = Set(Some(stage.clone()));
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(self.db).await?;

        tracing::info!(company_id, stage = %stage, "company marked as prospect");
        Ok(updated)
    }

    /// Copies registry data onto a company and marks it as sourced from
    /// Companies House.
    pub async fn apply_companies_house_profile(
        &self,
        company_id: i32,
        profile: &CompanyProfile,
    ) -> Result<CompanyModel, RepositoryError> {
        let company = self.require(company_id).await?;
        let mut active = company.into_active_model();

        if let Some(name) = truncated(profile.company_name.clone(), 255) {
            self.ensure_name_available(&name, Some(company_id)).await?;
            active.name = Set(name);
        }
        if let Some(number) = truncated(profile.company_number.clone(), 20) {
            active.companies_house_number = Set(Some(number.to_uppercase()));
        }
        if let Some(status) = truncated(profile.company_status.clone(), 50) {
            active.companies_house_status = Set(Some(status));
        }
        if let Some(address) = &profile.registered_office_address {
            active.address_line1 = Set(truncated(address.address_line_1.clone(), 255));
            active.address_line2 = Set(truncated(address.address_line_2.clone(), 255));
            active.city = Set(truncated(address.locality.clone(), 100));
            active.county = Set(truncated(address.region.clone(), 100));
            active.postcode = Set(truncated(address.postal_code.clone(), 20).map(|p| p.to_uppercase()));
            if let Some(country) = address.country.as_deref().and_then(country_from_registry) {
                active.country = Set(country.to_string());
            }
        }
        if let Some(sic) = profile.sic_codes.first() {
            active.sic_code = Set(truncated(Some(sic.clone()), 10));
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        active.data_source = Set("companies_house".to_string());
        active.last_updated_from_source = Set(Some(now));
        active.updated_at = Set(now);

        let updated = active.update(self.db).await?;
        tracing::info!(company_id, name = %updated.name, "company updated from Companies House");
        Ok(updated)
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(Company::find().count(self.db).await?)
    }
}

/// Whether `source` is an accepted data source label.
pub fn is_known_data_source(source: &str) -> bool {
    DATA_SOURCES.contains(&source)
}
