//! User entity model
//!
//! Users authenticate with email + password. Lockout and token revocation
//! state live on the row: `failed_login_count`/`lockout_until` and
//! `token_version`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::security::TokenSubject;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_ANALYST: &str = "analyst";
pub const ROLE_MEMBER: &str = "member";

/// Roles accepted on create/update.
pub const ROLES: &[&str] = &[ROLE_ADMIN, ROLE_ANALYST, ROLE_MEMBER];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Normalised (trimmed, lower-case) unique email
    #[sea_orm(unique)]
    pub email: String,

    pub full_name: Option<String>,

    /// PBKDF2 hash string; never serialised
    pub hashed_password: String,

    pub is_active: bool,
    pub is_superuser: bool,

    /// One of `admin`, `analyst`, `member`
    pub role: String,

    pub tenant_id: Option<i32>,

    pub failed_login_count: i32,
    pub lockout_until: Option<DateTimeWithTimeZone>,

    /// Embedded in every token as `tv`; bumping it revokes outstanding tokens
    pub token_version: i32,

    pub last_login_at: Option<DateTimeWithTimeZone>,
    pub password_changed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Superusers and users with the `admin` role are administrators.
    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }

    /// Whether a lockout is in force at `now`.
    pub fn is_locked(&self, now: DateTimeWithTimeZone) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    pub fn token_subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.id,
            role: self.role.clone(),
            tenant_id: self.tenant_id,
            token_version: self.token_version,
        }
    }
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
