//! Migration to create the code_hosts table.
//!
//! A code host row identifies one physical server (normalized base URL) that
//! any number of external service connections may point at, together with the
//! rate limits configured for it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CodeHosts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CodeHosts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CodeHosts::Kind).text().not_null())
                    .col(ColumnDef::new(CodeHosts::Url).text().not_null())
                    .col(ColumnDef::new(CodeHosts::ApiRateLimitQuota).integer().null())
                    .col(
                        ColumnDef::new(CodeHosts::ApiRateLimitIntervalSeconds)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CodeHosts::GitRateLimitQuota).integer().null())
                    .col(
                        ColumnDef::new(CodeHosts::GitRateLimitIntervalSeconds)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CodeHosts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CodeHosts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // The normalized URL is the identity of a code host; upserts conflict on it.
        manager
            .create_index(
                Index::create()
                    .name("idx_code_hosts_url")
                    .table(CodeHosts::Table)
                    .col(CodeHosts::Url)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_code_hosts_url").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CodeHosts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CodeHosts {
    Table,
    Id,
    Kind,
    Url,
    ApiRateLimitQuota,
    ApiRateLimitIntervalSeconds,
    GitRateLimitQuota,
    GitRateLimitIntervalSeconds,
    CreatedAt,
    UpdatedAt,
}
