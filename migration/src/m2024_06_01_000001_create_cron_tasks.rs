//! Migration to create the cron_tasks table.
//!
//! One row per monitored repository. The composite primary key on
//! `(owner_name, repo_name)` enforces a single configuration per repository.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CronTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CronTasks::OwnerName).text().not_null())
                    .col(ColumnDef::new(CronTasks::RepoName).text().not_null())
                    .col(ColumnDef::new(CronTasks::FromDate).date().null())
                    .col(ColumnDef::new(CronTasks::ToDate).date().null())
                    .col(
                        ColumnDef::new(CronTasks::DurationInHours)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_cron_tasks_owner_repo")
                            .col(CronTasks::OwnerName)
                            .col(CronTasks::RepoName),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CronTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CronTasks {
    Table,
    OwnerName,
    RepoName,
    FromDate,
    ToDate,
    DurationInHours,
}
