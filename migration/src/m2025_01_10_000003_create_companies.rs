//! Migration to create the companies table.
//!
//! Companies carry contact details, a UK-style address, optional Companies
//! House registry data and prospect pipeline state.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Companies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Companies::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Companies::TenantId).integer().null())
                    .col(ColumnDef::new(Companies::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Companies::Website).string_len(500).null())
                    .col(ColumnDef::new(Companies::Email).string_len(255).null())
                    .col(ColumnDef::new(Companies::Phone).string_len(50).null())
                    .col(ColumnDef::new(Companies::AddressLine1).string_len(255).null())
                    .col(ColumnDef::new(Companies::AddressLine2).string_len(255).null())
                    .col(ColumnDef::new(Companies::City).string_len(100).null())
                    .col(ColumnDef::new(Companies::County).string_len(100).null())
                    .col(ColumnDef::new(Companies::Postcode).string_len(20).null())
                    .col(
                        ColumnDef::new(Companies::Country)
                            .string_len(10)
                            .not_null()
                            .default("GB"),
                    )
                    .col(
                        ColumnDef::new(Companies::CompaniesHouseNumber)
                            .string_len(20)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Companies::CompaniesHouseStatus)
                            .string_len(50)
                            .null(),
                    )
                    .col(ColumnDef::new(Companies::Industry).string_len(100).null())
                    .col(ColumnDef::new(Companies::SicCode).string_len(10).null())
                    .col(ColumnDef::new(Companies::EmployeeCount).integer().null())
                    .col(ColumnDef::new(Companies::AnnualRevenue).big_integer().null())
                    .col(
                        ColumnDef::new(Companies::DataSource)
                            .string_len(50)
                            .not_null()
                            .default("manual"),
                    )
                    .col(
                        ColumnDef::new(Companies::LastUpdatedFromSource)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Companies::IsProspect)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Companies::ProspectStage).string_len(50).null())
                    .col(ColumnDef::new(Companies::Notes).text().null())
                    .col(
                        ColumnDef::new(Companies::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Companies::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_companies_tenant_id")
                            .from(Companies::Table, Companies::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_companies_name")
                    .table(Companies::Table)
                    .col(Companies::Name)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("ix_companies_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Companies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
    TenantId,
    Name,
    Website,
    Email,
    Phone,
    AddressLine1,
    AddressLine2,
    City,
    County,
    Postcode,
    Country,
    CompaniesHouseNumber,
    CompaniesHouseStatus,
    Industry,
    SicCode,
    EmployeeCount,
    AnnualRevenue,
    DataSource,
    LastUpdatedFromSource,
    IsProspect,
    ProspectStage,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
