//! Database seeding
//!
//! Inserts a small set of demo UK companies so a fresh database has
//! something to browse. Re-running is safe: names that already exist are
//! skipped.

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;

use crate::repositories::{CompanyCreate, CompanyRepository};

struct DemoCompany {
    name: &'static str,
    website: &'static str,
    city: &'static str,
    postcode: &'static str,
    industry: &'static str,
    sic_code: &'static str,
    employee_count: i32,
    companies_house_number: &'static str,
}

const DEMO_COMPANIES: &[DemoCompany] = &[
    DemoCompany {
        name: "Thames Analytics Ltd",
        website: "thames-analytics.co.uk",
        city: "London",
        postcode: "EC1A 1BB",
        industry: "Data Services",
        sic_code: "63110",
        employee_count: 42,
        companies_house_number: "09876543",
    },
    DemoCompany {
        name: "Pennine Engineering Ltd",
        website: "pennine-eng.co.uk",
        city: "Leeds",
        postcode: "LS1 4AP",
        industry: "Engineering",
        sic_code: "71129",
        employee_count: 120,
        companies_house_number: "04567890",
    },
    DemoCompany {
        name: "Clyde Software Ltd",
        website: "clydesoftware.co.uk",
        city: "Glasgow",
        postcode: "G1 1XQ",
        industry: "Software",
        sic_code: "62012",
        employee_count: 18,
        companies_house_number: "SC612345",
    },
    DemoCompany {
        name: "Severn Logistics Ltd",
        website: "severnlogistics.co.uk",
        city: "Bristol",
        postcode: "BS1 5TR",
        industry: "Logistics",
        sic_code: "49410",
        employee_count: 260,
        companies_house_number: "07123456",
    },
    DemoCompany {
        name: "Cardiff Bay Marketing Ltd",
        website: "cardiffbaymarketing.co.uk",
        city: "Cardiff",
        postcode: "CF10 5AL",
        industry: "Marketing",
        sic_code: "73110",
        employee_count: 9,
        companies_house_number: "11234567",
    },
];

/// Seeds demo companies, returning how many were inserted.
pub async fn seed_demo_companies(db: &DatabaseConnection) -> Result<usize> {
    let repo = CompanyRepository::new(db);
    let mut inserted = 0;

    for demo in DEMO_COMPANIES {
        if repo
            .get_by_name(demo.name)
            .await
            .with_context(|| format!("looking up company '{}'", demo.name))?
            .is_some()
        {
            tracing::info!(name = demo.name, "demo company already exists, skipping");
            continue;
        }

        repo.create(CompanyCreate {
            name: demo.name.to_string(),
            website: Some(demo.website.to_string()),
            city: Some(demo.city.to_string()),
            postcode: Some(demo.postcode.to_string()),
            country: Some("GB".to_string()),
            industry: Some(demo.industry.to_string()),
            sic_code: Some(demo.sic_code.to_string()),
            employee_count: Some(demo.employee_count),
            companies_house_number: Some(demo.companies_house_number.to_string()),
            ..Default::default()
        })
        .await
        .with_context(|| format!("creating company '{}'", demo.name))?;
        inserted += 1;
    }

    tracing::info!(inserted, total = DEMO_COMPANIES.len(), "demo companies seeded");
    Ok(inserted)
}
