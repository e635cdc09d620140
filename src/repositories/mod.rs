//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for users,
//! tenants and companies. Handlers never touch entities directly.

pub mod company;
pub mod tenant;
pub mod user;

pub use company::{CompanyCreate, CompanyFilter, CompanyOrder, CompanyRepository, CompanyUpdate, ListOptions};
pub use tenant::{CreateTenantRequest, TenantRepository};
pub use user::{LockoutPolicy, LoginOutcome, NewUser, UserChanges, UserRepository};

use sea_orm::sea_query::LikeExpr;

const LIKE_ESCAPE: char = '\\';

/// Escape `LIKE` metacharacters so user input only matches literally.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

/// Pattern matching `needle` anywhere in the column.
pub(crate) fn like_contains(needle: &str) -> LikeExpr {
    LikeExpr::new(format!("%{}%", escape_like(needle))).escape(LIKE_ESCAPE)
}

/// Pattern matching columns that start with `prefix`.
pub(crate) fn like_prefix(prefix: &str) -> LikeExpr {
    LikeExpr::new(format!("{}%", escape_like(prefix))).escape(LIKE_ESCAPE)
}
