//! # CronTask Repository
//!
//! SeaORM implementation of [`ConfigStore`] over the `cron_tasks` table.

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};

use super::ConfigStore;
use crate::error::RepositoryError;
use crate::models::cron_task::{ActiveModel, Column, Entity};
use crate::models::{MonitorConfig, RepoKey};

/// Repository for monitoring configurations
#[derive(Clone)]
pub struct CronTaskRepository {
    db: DatabaseConnection,
}

impl CronTaskRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigStore for CronTaskRepository {
    async fn save(&self, config: &MonitorConfig) -> Result<(), RepositoryError> {
        let active = ActiveModel::try_from(config)?;

        Entity::insert(active)
            .on_conflict(
                OnConflict::columns([Column::OwnerName, Column::RepoName])
                    .update_columns([Column::FromDate, Column::ToDate, Column::DurationInHours])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(repo = %config.key, error = %e, "Failed to save cron task");
                RepositoryError::from(e)
            })?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<MonitorConfig>, RepositoryError> {
        let rows = Entity::find()
            .order_by_asc(Column::OwnerName)
            .order_by_asc(Column::RepoName)
            .all(&self.db)
            .await?;

        rows.into_iter().map(MonitorConfig::try_from).collect()
    }

    async fn get(&self, key: &RepoKey) -> Result<Option<MonitorConfig>, RepositoryError> {
        Entity::find_by_id((key.owner_name.clone(), key.repo_name.clone()))
            .one(&self.db)
            .await?
            .map(MonitorConfig::try_from)
            .transpose()
    }

    async fn delete(&self, key: &RepoKey) -> Result<bool, RepositoryError> {
        let result = Entity::delete_by_id((key.owner_name.clone(), key.repo_name.clone()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(repo = %key, error = %e, "Failed to delete cron task");
                RepositoryError::from(e)
            })?;

        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use migration::{CronStoreMigrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> CronTaskRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        CronStoreMigrator::up(&db, None).await.unwrap();
        CronTaskRepository::new(db)
    }

    fn config(owner: &str, repo: &str, hours: u32) -> MonitorConfig {
        MonitorConfig {
            key: RepoKey::new(owner, repo),
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            to_date: None,
            poll_interval_hours: hours,
        }
    }

    #[tokio::test]
    async fn test_save_upserts_on_repo_key() {
        let repo = setup().await;

        repo.save(&config("acme", "widget", 1)).await.unwrap();
        repo.save(&config("acme", "widget", 6)).await.unwrap();
        repo.save(&config("acme", "gadget", 2)).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key.repo_name, "gadget");
        assert_eq!(all[1].poll_interval_hours, 6);
        assert_eq!(all[1].from_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let repo = setup().await;
        let key = RepoKey::new("acme", "widget");

        assert!(repo.get(&key).await.unwrap().is_none());
        assert!(!repo.delete(&key).await.unwrap());

        repo.save(&config("acme", "widget", 1)).await.unwrap();
        assert_eq!(repo.get(&key).await.unwrap().unwrap().poll_interval_hours, 1);

        assert!(repo.delete(&key).await.unwrap());
        assert!(repo.get(&key).await.unwrap().is_none());
    }
}
