//! # User Repository
//!
//! CRUD and credential operations for users: normalised email lookup,
//! lockout-aware authentication, password changes and token revocation.

use std::sync::LazyLock;

use chrono::{Duration, Utc};
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Func},
};

use crate::config::AppConfig;
use crate::error::RepositoryError;
use crate::repositories::like_contains;
use crate::models::user::{
    self, ActiveModel as UserActiveModel, Entity as User, Model as UserModel, ROLE_ADMIN,
    ROLE_ANALYST, ROLES,
};
use crate::security::{PasswordError, PasswordHasher};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid")
});

/// Trims and lower-cases an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn validate_email(email: &str) -> Result<(), RepositoryError> {
    if email.is_empty() {
        return Err(RepositoryError::validation_error("Email must not be empty"));
    }
    if email.len() > 255 {
        return Err(RepositoryError::validation_error("Email too long"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(RepositoryError::validation_error("Invalid email address"));
    }
    Ok(())
}

fn normalize_role(role: &str) -> Result<String, RepositoryError> {
    let role = role.trim().to_lowercase();
    if ROLES.contains(&role.as_str()) {
        Ok(role)
    } else {
        Err(RepositoryError::validation_error("Invalid role"))
    }
}

fn clean_full_name(full_name: Option<String>) -> Result<Option<String>, RepositoryError> {
    let cleaned = full_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    if cleaned.as_ref().is_some_and(|name| name.chars().count() > 255) {
        return Err(RepositoryError::validation_error("Full name too long"));
    }
    Ok(cleaned)
}

impl From<PasswordError> for RepositoryError {
    fn from(error: PasswordError) -> Self {
        RepositoryError::validation_error(error.to_string())
    }
}

/// Data for a new user; the password is plaintext and hashed on insert.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub tenant_id: Option<i32>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub tenant_id: Option<i32>,
}

/// Failed-login threshold and lockout window.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
}

impl LockoutPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_failed_logins: config.max_failed_logins,
            lockout_minutes: config.lockout_minutes,
        }
    }
}

/// Result of a credential check.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(UserModel),
    Locked { until: DateTimeWithTimeZone },
    InvalidCredentials,
    Disabled,
}

/// Repository for User database operations
pub struct UserRepository<'a> {
    db: &'a DatabaseConnection,
    hasher: &'a PasswordHasher,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a DatabaseConnection, hasher: &'a PasswordHasher) -> Self {
        Self { db, hasher }
    }

    pub async fn get(&self, user_id: i32) -> Result<Option<UserModel>, RepositoryError> {
        if user_id <= 0 {
            return Ok(None);
        }
        Ok(User::find_by_id(user_id).one(self.db).await?)
    }

    /// Looks up a user by normalised email.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<UserModel>, RepositoryError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(None);
        }
        Ok(User::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db)
            .await?)
    }

    fn search_condition(q: Option<&str>) -> Condition {
        match q.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let needle = q.to_lowercase();
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(user::Column::Email))).like(like_contains(&needle)))
                    .add(Expr::expr(Func::lower(Expr::col(user::Column::FullName))).like(like_contains(&needle)))
            }
            None => Condition::all(),
        }
    }

    /// Lists users, newest id first, optionally filtered by email/full name.
    pub async fn list(
        &self,
        limit: u64,
        offset: u64,
        q: Option<&str>,
    ) -> Result<Vec<UserModel>, RepositoryError> {
        Ok(User::find()
            .filter(Self::search_condition(q))
            .order_by_desc(user::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(self.db)
            .await?)
    }

    /// Zero-based page of users plus the total match count.
    pub async fn list_paged(
        &self,
        page: u64,
        page_size: u64,
        q: Option<&str>,
    ) -> Result<(Vec<UserModel>, u64), RepositoryError> {
        let page_size = page_size.max(1);
        let offset = page
            .checked_mul(page_size)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| RepositoryError::validation_error("page out of range"))?;

        let select = User::find().filter(Self::search_condition(q));
        let total = select.clone().count(self.db).await?;
        let items = select
            .order_by_desc(user::Column::Id)
            .limit(page_size)
            .offset(offset)
            .all(self.db)
            .await?;
        Ok((items, total))
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(User::find().count(self.db).await?)
    }

    pub async fn create(&self, new_user: NewUser) -> Result<UserModel, RepositoryError> {
        let email = normalize_email(&new_user.email);
        validate_email(&email)?;
        let full_name = clean_full_name(new_user.full_name)?;
        let role = normalize_role(new_user.role.as_deref().unwrap_or(ROLE_ANALYST))?;

        if self.get_by_email(&email).await?.is_some() {
            return Err(RepositoryError::conflict(
                "A user with this email already exists",
            ));
        }

        let hashed_password = self.hasher.hash(new_user.password.trim())?;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let user = UserActiveModel {
            email: Set(email.clone()),
            full_name: Set(full_name),
            hashed_password: Set(hashed_password),
            is_active: Set(new_user.is_active.unwrap_or(true)),
            is_superuser: Set(new_user.is_superuser.unwrap_or(false)),
            role: Set(role),
            tenant_id: Set(new_user.tenant_id),
            failed_login_count: Set(0),
            lockout_until: Set(None),
            token_version: Set(0),
            last_login_at: Set(None),
            password_changed_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db)
        .await?;

        tracing::info!(user_id = user.id, email = %email, "user created");
        Ok(user)
    }

    /// Applies a partial update.
    ///
    /// Role changes require `allow_role_change`; a password change re-hashes
    /// and bumps `token_version`.
    pub async fn update(
        &self,
        user_id: i32,
        changes: UserChanges,
        allow_role_change: bool,
    ) -> Result<UserModel, RepositoryError> {
        let current = self
            .get(user_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("User not found"))?;
        let token_version = current.token_version;
        let mut active = current.into_active_model();

        if let Some(email) = changes.email {
            let email = normalize_email(&email);
            validate_email(&email)?;
            if let Some(existing) = self.get_by_email(&email).await? {
                if existing.id != user_id {
                    return Err(RepositoryError::conflict(
                        "A user with this email already exists",
                    ));
                }
            }
            active.email = Set(email);
        }

        if changes.full_name.is_some() {
            active.full_name = Set(clean_full_name(changes.full_name)?);
        }
        if let Some(tenant_id) = changes.tenant_id {
            active.tenant_id = Set(Some(tenant_id));
        }
        if let Some(is_active) = changes.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_superuser) = changes.is_superuser {
            active.is_superuser = Set(is_superuser);
        }

        if let Some(role) = changes.role {
            if !allow_role_change {
                return Err(RepositoryError::Forbidden(
                    "Role changes require elevated privileges".to_string(),
                ));
            }
            active.role = Set(normalize_role(&role)?);
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        if let Some(password) = changes.password.filter(|p| !p.is_empty()) {
            active.hashed_password = Set(self.hasher.hash(password.trim())?);
            active.password_changed_at = Set(Some(now));
            active.token_version = Set(token_version + 1);
        }

        active.updated_at = Set(now);
        let updated = active.update(self.db).await?;
        tracing::info!(user_id = updated.id, "user updated");
        Ok(updated)
    }

    /// Soft-deletes a user. Returns whether a row changed; a missing or
    /// already inactive user is not an error.
    pub async fn deactivate(&self, user_id: i32) -> Result<bool, RepositoryError> {
        let Some(user) = self.get(user_id).await? else {
            return Ok(false);
        };
        if !user.is_active {
            return Ok(false);
        }

        let mut active = user.into_active_model();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        active.update(self.db).await?;

        tracing::info!(user_id, "user deactivated");
        Ok(true)
    }

    /// Checks credentials, maintaining lockout counters.
    ///
    /// Unknown emails and wrong passwords are indistinguishable. The password
    /// is verified before the active flag, so a disabled account is only
    /// reported to a caller who knows its password.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        policy: LockoutPolicy,
        now: DateTimeWithTimeZone,
    ) -> Result<LoginOutcome, RepositoryError> {
        let Some(user) = self.get_by_email(email).await? else {
            return Ok(LoginOutcome::InvalidCredentials);
        };

        if let Some(until) = user.lockout_until.filter(|until| *until > now) {
            return Ok(LoginOutcome::Locked { until });
        }

        if !self.hasher.verify(password, &user.hashed_password) {
            self.record_failed_login(user, policy, now).await?;
            return Ok(LoginOutcome::InvalidCredentials);
        }

        if !user.is_active {
            return Ok(LoginOutcome::Disabled);
        }

        let mut user = self.record_successful_login(user, now).await?;

        if self.hasher.needs_rehash(&user.hashed_password) {
            match self.hasher.hash(password) {
                Ok(rehashed) => {
                    let mut active = user.clone().into_active_model();
                    active.hashed_password = Set(rehashed);
                    match active.update(self.db).await {
                        Ok(updated) => {
                            tracing::info!(user_id = updated.id, "password hash upgraded");
                            user = updated;
                        }
                        Err(error) => {
                            tracing::warn!(user_id = user.id, %error, "password rehash failed");
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(user_id = user.id, %error, "password rehash skipped");
                }
            }
        }

        Ok(LoginOutcome::Authenticated(user))
    }

    /// Counts a failed login. Reaching the threshold sets `lockout_until`
    /// and resets the counter.
    pub async fn record_failed_login(
        &self,
        user: UserModel,
        policy: LockoutPolicy,
        now: DateTimeWithTimeZone,
    ) -> Result<UserModel, RepositoryError> {
        let failures = user.failed_login_count.max(0) + 1;
        let mut active = user.into_active_model();

        if failures >= policy.max_failed_logins {
            let until = now + Duration::minutes(policy.lockout_minutes);
            active.lockout_until = Set(Some(until));
            active.failed_login_count = Set(0);
            metrics::counter!("auth_lockouts_total").increment(1);
        } else {
            active.failed_login_count = Set(failures);
        }

        let updated = active.update(self.db).await?;
        if let Some(until) = updated.lockout_until.filter(|until| *until > now) {
            tracing::warn!(user_id = updated.id, %until, "user locked out");
        }
        Ok(updated)
    }

    /// Resets lockout state and stamps `last_login_at`.
    pub async fn record_successful_login(
        &self,
        user: UserModel,
        now: DateTimeWithTimeZone,
    ) -> Result<UserModel, RepositoryError> {
        let mut active = user.into_active_model();
        active.failed_login_count = Set(0);
        active.lockout_until = Set(None);
        active.last_login_at = Set(Some(now));
        Ok(active.update(self.db).await?)
    }

    /// Sets a new password, optionally revoking existing tokens.
    pub async fn set_password(
        &self,
        user: UserModel,
        new_password: &str,
        bump_token_version: bool,
    ) -> Result<UserModel, RepositoryError> {
        let hashed = self.hasher.hash(new_password.trim())?;
        let token_version = user.token_version;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let mut active = user.into_active_model();
        active.hashed_password = Set(hashed);
        active.password_changed_at = Set(Some(now));
        active.updated_at = Set(now);
        if bump_token_version {
            active.token_version = Set(token_version + 1);
        }

        let updated = active.update(self.db).await?;
        tracing::info!(user_id = updated.id, "password changed");
        Ok(updated)
    }

    /// Increments `token_version`, invalidating every outstanding token.
    pub async fn revoke_tokens(&self, user: UserModel) -> Result<UserModel, RepositoryError> {
        let token_version = user.token_version;
        let mut active = user.into_active_model();
        active.token_version = Set(token_version + 1);
        let updated = active.update(self.db).await?;
        tracing::info!(user_id = updated.id, "tokens revoked");
        Ok(updated)
    }

    /// Creates a superuser admin only when the users table is empty.
    pub async fn ensure_initial_admin(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
    ) -> Result<Option<UserModel>, RepositoryError> {
        if self.count().await? > 0 {
            return Ok(None);
        }

        let admin = self
            .create(NewUser {
                email: email.to_string(),
                password: password.to_string(),
                full_name,
                role: Some(ROLE_ADMIN.to_string()),
                is_active: Some(true),
                is_superuser: Some(true),
                tenant_id: None,
            })
            .await?;
        Ok(Some(admin))
    }
}
