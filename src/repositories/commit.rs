//! # Commit Repository
//!
//! SeaORM implementation of [`CommitStore`] over the `commits` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect,
    Select,
};

use super::CommitStore;
use crate::error::RepositoryError;
use crate::models::commit::{ActiveModel, Column, Entity};
use crate::models::{AuthorAggregate, Commit, CommitFilter, RepoKey};

/// Repository for mirrored commits
#[derive(Clone)]
pub struct CommitRepository {
    db: DatabaseConnection,
}

impl CommitRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn scoped(key: &RepoKey) -> Select<Entity> {
        Entity::find()
            .filter(Column::OwnerName.eq(key.owner_name.as_str()))
            .filter(Column::RepoName.eq(key.repo_name.as_str()))
    }

    fn windowed(filter: &CommitFilter) -> Select<Entity> {
        let window = filter.window();
        let mut query = Self::scoped(&filter.key);
        if let Some(since) = window.since {
            query = query.filter(Column::Date.gte(since.fixed_offset()));
        }
        if let Some(until) = window.until {
            query = query.filter(Column::Date.lt(until.fixed_offset()));
        }
        query
    }
}

fn log_db_err(context: &'static str) -> impl Fn(sea_orm::DbErr) -> RepositoryError {
    move |err| {
        tracing::error!(error = %err, context, "commit store operation failed");
        RepositoryError::Database(err)
    }
}

#[async_trait]
impl CommitStore for CommitRepository {
    async fn save_commit(&self, commit: &Commit) -> Result<bool, RepositoryError> {
        let rows = Entity::insert(ActiveModel::from(commit))
            .on_conflict(
                OnConflict::columns([Column::OwnerName, Column::RepoName, Column::Sha])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(log_db_err("save_commit"))?;

        Ok(rows > 0)
    }

    async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>, RepositoryError> {
        let rows = Self::windowed(filter)
            .order_by_desc(Column::Date)
            .order_by_asc(Column::Sha)
            .offset(filter.offset())
            .limit(filter.limit)
            .all(&self.db)
            .await
            .map_err(log_db_err("list_commits"))?;

        Ok(rows.into_iter().map(Commit::from).collect())
    }

    async fn get_last_commit(
        &self,
        key: &RepoKey,
        since_hint: Option<DateTime<Utc>>,
    ) -> Result<Option<Commit>, RepositoryError> {
        let mut query = Self::scoped(key);
        if let Some(since) = since_hint {
            query = query.filter(Column::Date.gte(since.fixed_offset()));
        }

        let row = query
            .order_by_desc(Column::Date)
            .order_by_asc(Column::Sha)
            .one(&self.db)
            .await
            .map_err(log_db_err("get_last_commit"))?;

        Ok(row.map(Commit::from))
    }

    async fn get_commit_by_sha(
        &self,
        key: &RepoKey,
        sha: &str,
    ) -> Result<Option<Commit>, RepositoryError> {
        let row = Entity::find_by_id((
            key.owner_name.clone(),
            key.repo_name.clone(),
            sha.to_string(),
        ))
        .one(&self.db)
        .await
        .map_err(log_db_err("get_commit_by_sha"))?;

        Ok(row.map(Commit::from))
    }

    async fn get_top_authors(
        &self,
        filter: &CommitFilter,
    ) -> Result<Vec<AuthorAggregate>, RepositoryError> {
        let rows: Vec<(String, i64)> = Self::windowed(filter)
            .select_only()
            .column(Column::Author)
            .column_as(Expr::col(Column::Sha).count(), "commit_count")
            .group_by(Column::Author)
            .order_by(Expr::cust("commit_count"), Order::Desc)
            .order_by_asc(Column::Author)
            .offset(filter.offset())
            .limit(filter.limit)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(log_db_err("get_top_authors"))?;

        Ok(rows
            .into_iter()
            .map(|(author, count)| AuthorAggregate {
                key: filter.key.clone(),
                author,
                commit_count: u64::try_from(count).unwrap_or_default(),
            })
            .collect())
    }
}
