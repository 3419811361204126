//! Migration to create the commits table.
//!
//! Commits are keyed by `(owner_name, repo_name, sha)` so forks sharing history
//! can be mirrored side by side. Secondary indexes back the date-ordered listing
//! and the author aggregate.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commits::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Commits::OwnerName).text().not_null())
                    .col(ColumnDef::new(Commits::RepoName).text().not_null())
                    .col(ColumnDef::new(Commits::Sha).text().not_null())
                    .col(ColumnDef::new(Commits::Author).text().not_null())
                    .col(ColumnDef::new(Commits::Message).text().not_null())
                    .col(
                        ColumnDef::new(Commits::Date)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commits::Url).text().not_null())
                    .col(
                        ColumnDef::new(Commits::ParentShasCsv)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_commits_owner_repo_sha")
                            .col(Commits::OwnerName)
                            .col(Commits::RepoName)
                            .col(Commits::Sha),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_owner_repo_date")
                    .table(Commits::Table)
                    .col(Commits::OwnerName)
                    .col(Commits::RepoName)
                    .col(Commits::Date)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_owner_repo_author")
                    .table(Commits::Table)
                    .col(Commits::OwnerName)
                    .col(Commits::RepoName)
                    .col(Commits::Author)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_commits_owner_repo_author")
                    .table(Commits::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_commits_owner_repo_date")
                    .table(Commits::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Commits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Commits {
    Table,
    OwnerName,
    RepoName,
    Sha,
    Author,
    Message,
    Date,
    Url,
    ParentShasCsv,
}
