//! Database migrations for the detecktiv backend.
//!
//! Migrations are applied in registration order; [`Migrator::validate_graph`]
//! proves the registered list forms a single linear chain.

pub use sea_orm_migration::prelude::*;

pub mod graph;

mod m2025_01_10_000001_create_tenants;
mod m2025_01_10_000002_create_users;
mod m2025_01_10_000003_create_companies;
mod m2025_02_01_000001_add_user_security_columns;

use graph::{GraphProblem, GraphReport, Revision};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_tenants::Migration),
            Box::new(m2025_01_10_000002_create_users::Migration),
            Box::new(m2025_01_10_000003_create_companies::Migration),
            Box::new(m2025_02_01_000001_add_user_security_columns::Migration),
        ]
    }
}

impl Migrator {
    /// Registered migration names in application order.
    pub fn names() -> Vec<String> {
        Self::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Revision graph derived from registration order.
    pub fn revisions() -> Vec<Revision> {
        graph::linear_chain(Self::names())
    }

    /// Validates the revision graph and that names sort in registration order.
    pub fn validate_graph() -> Result<GraphReport, Vec<GraphProblem>> {
        let names = Self::names();
        let mut problems: Vec<GraphProblem> = names
            .windows(2)
            .filter(|pair| pair[0] >= pair[1])
            .map(|pair| GraphProblem::OutOfOrder(pair[1].clone()))
            .collect();

        match graph::validate(&Self::revisions()) {
            Ok(report) if problems.is_empty() => Ok(report),
            Ok(_) => Err(problems),
            Err(mut graph_problems) => {
                problems.append(&mut graph_problems);
                Err(problems)
            }
        }
    }
}
