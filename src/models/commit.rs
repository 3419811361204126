//! Commit entity model
//!
//! SeaORM entity for the `commits` table. Parent SHAs are flattened into a
//! comma separated column; SHAs never contain commas.

use chrono::Utc;
use sea_orm::ActiveModelBehavior;
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::{Commit, RepoKey};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_name: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub repo_name: String,

    /// 40-hex commit id
    #[sea_orm(primary_key, auto_increment = false)]
    pub sha: String,

    /// Committer display name
    pub author: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    /// Committer instant, always stored at UTC offset
    pub date: DateTimeWithTimeZone,

    pub url: String,

    #[sea_orm(column_type = "Text")]
    pub parent_shas_csv: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Commit {
    fn from(model: Model) -> Self {
        let parent_shas = model
            .parent_shas_csv
            .split(',')
            .filter(|sha| !sha.is_empty())
            .map(str::to_string)
            .collect();

        Commit {
            key: RepoKey::new(model.owner_name, model.repo_name),
            sha: model.sha,
            author: model.author,
            message: model.message,
            date: model.date.with_timezone(&Utc),
            url: model.url,
            parent_shas,
        }
    }
}

impl From<&Commit> for ActiveModel {
    fn from(commit: &Commit) -> Self {
        ActiveModel {
            owner_name: Set(commit.key.owner_name.clone()),
            repo_name: Set(commit.key.repo_name.clone()),
            sha: Set(commit.sha.clone()),
            author: Set(commit.author.clone()),
            message: Set(commit.message.clone()),
            date: Set(commit.date.fixed_offset()),
            url: Set(commit.url.clone()),
            parent_shas_csv: Set(commit.parent_shas.join(",")),
        }
    }
}
