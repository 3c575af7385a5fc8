//! Migration to create the external_services table.
//!
//! Each row is a code host connection: its kind, encrypted configuration and
//! sync bookkeeping. Rows are soft deleted through `deleted_at`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExternalServices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExternalServices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExternalServices::Kind).text().not_null())
                    .col(
                        ColumnDef::new(ExternalServices::DisplayName)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ExternalServices::Config).binary().not_null())
                    .col(
                        ColumnDef::new(ExternalServices::EncryptionKeyId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::Unrestricted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::CloudDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::HasWebhooks)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::CodeHostId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::NextSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServices::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_services_code_host_id")
                            .from(ExternalServices::Table, ExternalServices::CodeHostId)
                            .to(CodeHosts::Table, CodeHosts::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_external_services_code_host_id")
                    .table(ExternalServices::Table)
                    .col(ExternalServices::CodeHostId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_external_services_kind_deleted")
                    .table(ExternalServices::Table)
                    .col(ExternalServices::Kind)
                    .col(ExternalServices::DeletedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_external_services_code_host_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_external_services_kind_deleted")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ExternalServices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExternalServices {
    Table,
    Id,
    Kind,
    DisplayName,
    Config,
    EncryptionKeyId,
    Unrestricted,
    CloudDefault,
    HasWebhooks,
    CodeHostId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    LastSyncAt,
    NextSyncAt,
    TokenExpiresAt,
}

#[derive(DeriveIden)]
enum CodeHosts {
    Table,
    Id,
}
