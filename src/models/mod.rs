//! # Data Models
//!
//! SeaORM entities for tenants, users and companies, plus the service
//! information payload returned by the root endpoint.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod company;
pub mod tenant;
pub mod user;

pub use company::Entity as Company;
pub use tenant::Entity as Tenant;
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "detecktiv".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
