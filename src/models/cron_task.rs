//! CronTask entity model
//!
//! One row per monitored repository in the `cron_tasks` table.

use sea_orm::ActiveModelBehavior;
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

use super::{MonitorConfig, RepoKey};
use crate::error::RepositoryError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "cron_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_name: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub repo_name: String,

    pub from_date: Option<Date>,

    pub to_date: Option<Date>,

    /// Poll interval in hours
    pub duration_in_hours: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for MonitorConfig {
    type Error = RepositoryError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let poll_interval_hours = u32::try_from(model.duration_in_hours).map_err(|_| {
            RepositoryError::Corrupt(format!(
                "cron task {}/{} has negative interval {}",
                model.owner_name, model.repo_name, model.duration_in_hours
            ))
        })?;

        Ok(MonitorConfig {
            key: RepoKey::new(model.owner_name, model.repo_name),
            from_date: model.from_date,
            to_date: model.to_date,
            poll_interval_hours,
        })
    }
}

impl TryFrom<&MonitorConfig> for ActiveModel {
    type Error = RepositoryError;

    fn try_from(config: &MonitorConfig) -> Result<Self, Self::Error> {
        let duration_in_hours = i32::try_from(config.poll_interval_hours).map_err(|_| {
            RepositoryError::Corrupt(format!(
                "poll interval {} does not fit the cron_tasks column",
                config.poll_interval_hours
            ))
        })?;

        Ok(ActiveModel {
            owner_name: Set(config.key.owner_name.clone()),
            repo_name: Set(config.key.repo_name.clone()),
            from_date: Set(config.from_date),
            to_date: Set(config.to_date),
            duration_in_hours: Set(duration_in_hours),
        })
    }
}
