//! Database migrations for the commit monitor.
//!
//! The commit mirror and the monitoring configuration live in two independent
//! databases, so each one gets its own migrator.

pub use sea_orm_migration::prelude::*;

mod m2024_06_01_000001_create_cron_tasks;
mod m2024_06_01_000002_create_commits;

/// Migrator for the monitoring configuration database (`cron_tasks`).
pub struct CronStoreMigrator;

#[async_trait::async_trait]
impl MigratorTrait for CronStoreMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2024_06_01_000001_create_cron_tasks::Migration)]
    }
}

/// Migrator for the mirrored commit database (`commits`).
pub struct CommitStoreMigrator;

#[async_trait::async_trait]
impl MigratorTrait for CommitStoreMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2024_06_01_000002_create_commits::Migration)]
    }
}
