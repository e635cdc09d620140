//! # Tenant Repository
//!
//! This module contains the repository implementation for Tenant entities,
//! providing creation and lookup by id or key.

use crate::error::RepositoryError;
use crate::models::tenant::{
    self, ActiveModel as TenantActiveModel, Entity as Tenant, Model as TenantModel,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

/// Request data for creating a new tenant
#[derive(Debug, Clone)]
pub struct CreateTenantRequest {
    /// Unique key (`[a-z0-9_-]`, 1..=64 characters)
    pub key: String,
    /// Display name for the tenant
    pub name: Option<String>,
}

/// Repository for Tenant database operations
pub struct TenantRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TenantRepository<'a> {
    /// Create a new TenantRepository with the given database connection
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a new tenant
    pub async fn create(&self, request: CreateTenantRequest) -> Result<TenantModel, RepositoryError> {
        let key = request.key.trim().to_lowercase();
        validate_tenant_key(&key)?;
        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if name.as_ref().is_some_and(|n| n.chars().count() > 255) {
            return Err(RepositoryError::validation_error(
                "Tenant name cannot exceed 255 characters",
            ));
        }

        if self.get_by_key(&key).await?.is_some() {
            return Err(RepositoryError::conflict(format!(
                "Tenant '{key}' already exists"
            )));
        }

        let now = Utc::now();
        let tenant = TenantActiveModel {
            key: Set(key),
            name: Set(name),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)?;

        tracing::info!(tenant_id = tenant.id, key = %tenant.key, "tenant created");
        Ok(tenant)
    }

    /// Get tenant by ID
    pub async fn get(&self, tenant_id: i32) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find_by_id(tenant_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Get tenant by its unique key
    pub async fn get_by_key(&self, key: &str) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(tenant::Column::Key.eq(key.trim().to_lowercase()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// List all tenants ordered by id
    pub async fn list(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .order_by_asc(tenant::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

/// Validate a tenant key: lower-case letters, digits, `_` and `-`.
fn validate_tenant_key(key: &str) -> Result<(), RepositoryError> {
    if key.is_empty() {
        return Err(RepositoryError::validation_error(
            "Tenant key cannot be empty",
        ));
    }

    if key.len() > 64 {
        return Err(RepositoryError::validation_error(
            "Tenant key cannot exceed 64 characters",
        ));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(RepositoryError::validation_error(
            "Tenant key can only contain lower-case letters, digits, hyphens and underscores",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup_test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    fn request(key: &str) -> CreateTenantRequest {
        CreateTenantRequest {
            key: key.to_string(),
            name: Some("Acme Ltd".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_tenant() {
        let db = setup_test_db().await;
        let repo = TenantRepository::new(&db);

        let tenant = repo.create(request("  Acme ")).await.unwrap();
        assert_eq!(tenant.key, "acme");
        assert_eq!(tenant.name.as_deref(), Some("Acme Ltd"));

        assert_eq!(repo.get(tenant.id).await.unwrap(), Some(tenant.clone()));
        assert_eq!(repo.get_by_key("ACME").await.unwrap(), Some(tenant));
        assert!(repo.get(9_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let db = setup_test_db().await;
        let repo = TenantRepository::new(&db);

        repo.create(request("acme")).await.unwrap();
        let err = repo.create(request("acme")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_tenant_validation() {
        let db = setup_test_db().await;
        let repo = TenantRepository::new(&db);

        let too_long = "k".repeat(65);
        for key in ["", "has space", "acme!", too_long.as_str()] {
            let result = repo.create(request(key)).await;
            assert!(
                matches!(result, Err(RepositoryError::Validation(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
