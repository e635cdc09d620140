//! Migration adding login lockout and token revocation columns to users,
//! plus the lookup indexes used by the admin and company listings.
//!
//! SQLite accepts a single column per `ALTER TABLE`, so each column is added
//! with its own statement.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const INDEXES: &[&str] = &[
    "ix_users_active_role",
    "ix_users_tenant_email",
    "ix_companies_postcode",
    "ix_companies_ch_number",
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let columns = [
            ColumnDef::new(Users::FailedLoginCount)
                .integer()
                .not_null()
                .default(0)
                .to_owned(),
            ColumnDef::new(Users::LockoutUntil)
                .timestamp_with_time_zone()
                .null()
                .to_owned(),
            ColumnDef::new(Users::TokenVersion)
                .integer()
                .not_null()
                .default(0)
                .to_owned(),
            ColumnDef::new(Users::LastLoginAt)
                .timestamp_with_time_zone()
                .null()
                .to_owned(),
            ColumnDef::new(Users::PasswordChangedAt)
                .timestamp_with_time_zone()
                .null()
                .to_owned(),
        ];

        for column in columns {
            manager
                .alter_table(
                    Table::alter()
                        .table(Users::Table)
                        .add_column(column)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_index(
                Index::create()
                    .name("ix_users_active_role")
                    .table(Users::Table)
                    .col(Users::IsActive)
                    .col(Users::Role)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_users_tenant_email")
                    .table(Users::Table)
                    .col(Users::TenantId)
                    .col(Users::Email)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_companies_postcode")
                    .table(Companies::Table)
                    .col(Companies::Postcode)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_companies_ch_number")
                    .table(Companies::Table)
                    .col(Companies::CompaniesHouseNumber)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in INDEXES {
            manager
                .drop_index(Index::drop().name(*name).to_owned())
                .await?;
        }

        for column in [
            Users::PasswordChangedAt,
            Users::LastLoginAt,
            Users::TokenVersion,
            Users::LockoutUntil,
            Users::FailedLoginCount,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(Users::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Email,
    IsActive,
    Role,
    TenantId,
    FailedLoginCount,
    LockoutUntil,
    TokenVersion,
    LastLoginAt,
    PasswordChangedAt,
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Postcode,
    CompaniesHouseNumber,
}
