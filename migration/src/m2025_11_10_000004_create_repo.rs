//! Migration to create the repo and external_service_repos tables.
//!
//! `external_service_repos` is the ownership relation between connections and
//! repositories; a repository without any row here is an orphan.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repo::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repo::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Repo::Name).text().not_null())
                    .col(
                        ColumnDef::new(Repo::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Repo::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Repo::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repo_name")
                    .table(Repo::Table)
                    .col(Repo::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ExternalServiceRepos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExternalServiceRepos::ExternalServiceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServiceRepos::RepoId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServiceRepos::CloneUrl)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalServiceRepos::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(ExternalServiceRepos::ExternalServiceId)
                            .col(ExternalServiceRepos::RepoId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_service_repos_external_service_id")
                            .from(
                                ExternalServiceRepos::Table,
                                ExternalServiceRepos::ExternalServiceId,
                            )
                            .to(ExternalServices::Table, ExternalServices::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_service_repos_repo_id")
                            .from(ExternalServiceRepos::Table, ExternalServiceRepos::RepoId)
                            .to(Repo::Table, Repo::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The orphan check probes associations by repo.
        manager
            .create_index(
                Index::create()
                    .name("idx_external_service_repos_repo_id")
                    .table(ExternalServiceRepos::Table)
                    .col(ExternalServiceRepos::RepoId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_external_service_repos_repo_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ExternalServiceRepos::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_repo_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Repo::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Repo {
    Table,
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum ExternalServiceRepos {
    Table,
    ExternalServiceId,
    RepoId,
    CloneUrl,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ExternalServices {
    Table,
    Id,
}
