//! Migration to create the external_service_sync_jobs table.
//!
//! Sync jobs are never deleted alongside their connection; they are kept as
//! history and for the "latest sync error" projections.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncJobs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ExternalServiceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::State)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(ColumnDef::new(SyncJobs::FailureMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::QueuedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ProcessAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::NumResets)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::NumFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Cancel)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(counter(SyncJobs::ReposSynced))
                    .col(counter(SyncJobs::ReposAdded))
                    .col(counter(SyncJobs::ReposModified))
                    .col(counter(SyncJobs::ReposUnmodified))
                    .col(counter(SyncJobs::ReposDeleted))
                    .col(counter(SyncJobs::RepoSyncErrors))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_service_sync_jobs_external_service_id")
                            .from(SyncJobs::Table, SyncJobs::ExternalServiceId)
                            .to(ExternalServices::Table, ExternalServices::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Drain polling and SyncDue both look up live jobs per connection.
        manager
            .create_index(
                Index::create()
                    .name("idx_external_service_sync_jobs_service_state")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::ExternalServiceId)
                    .col(SyncJobs::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_external_service_sync_jobs_service_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

fn counter(column: SyncJobs) -> ColumnDef {
    ColumnDef::new(column).integer().not_null().default(0).to_owned()
}

#[derive(DeriveIden)]
enum SyncJobs {
    #[sea_orm(iden = "external_service_sync_jobs")]
    Table,
    Id,
    ExternalServiceId,
    State,
    FailureMessage,
    QueuedAt,
    StartedAt,
    FinishedAt,
    ProcessAfter,
    NumResets,
    NumFailures,
    Cancel,
    ReposSynced,
    ReposAdded,
    ReposModified,
    ReposUnmodified,
    ReposDeleted,
    RepoSyncErrors,
}

#[derive(DeriveIden)]
enum ExternalServices {
    Table,
    Id,
}
