//! Migration to create the security_event_logs table used for audit events.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SecurityEventLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SecurityEventLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SecurityEventLogs::Name).text().not_null())
                    .col(
                        ColumnDef::new(SecurityEventLogs::Argument)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SecurityEventLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_security_event_logs_name_created_at")
                    .table(SecurityEventLogs::Table)
                    .col(SecurityEventLogs::Name)
                    .col(SecurityEventLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_security_event_logs_name_created_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SecurityEventLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SecurityEventLogs {
    Table,
    Id,
    Name,
    Argument,
    CreatedAt,
}
