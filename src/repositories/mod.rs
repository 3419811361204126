//! # Repository Layer
//!
//! Storage seams for the monitoring core. The core only talks to the
//! [`CommitStore`] and [`ConfigStore`] traits; SeaORM-backed implementations
//! persist to SQL, the in-memory ones back tests and ephemeral runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::models::{AuthorAggregate, Commit, CommitFilter, MonitorConfig, RepoKey};

pub mod commit;
pub mod cron_task;
pub mod memory;

pub use commit::CommitRepository;
pub use cron_task::CronTaskRepository;
pub use memory::{InMemoryCommitStore, InMemoryConfigStore};

/// Durable collection of mirrored commits keyed by `(owner, repo, sha)`.
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Inserts `commit` unless a row with the same key already exists.
    /// Returns `true` when a new row was written.
    async fn save_commit(&self, commit: &Commit) -> Result<bool, RepositoryError>;

    /// Commits matching `filter`, ordered by `date desc, sha asc`.
    async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>, RepositoryError>;

    /// The commit with the greatest date for `key`. When `since_hint` is set,
    /// only commits dated at or after it are considered.
    async fn get_last_commit(
        &self,
        key: &RepoKey,
        since_hint: Option<DateTime<Utc>>,
    ) -> Result<Option<Commit>, RepositoryError>;

    async fn get_commit_by_sha(
        &self,
        key: &RepoKey,
        sha: &str,
    ) -> Result<Option<Commit>, RepositoryError>;

    /// Author commit counts over the filter window, ordered by
    /// `commit_count desc, author asc`.
    async fn get_top_authors(
        &self,
        filter: &CommitFilter,
    ) -> Result<Vec<AuthorAggregate>, RepositoryError>;
}

/// Durable mapping of monitoring configurations keyed by repository.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Inserts or replaces the configuration for `config.key`.
    async fn save(&self, config: &MonitorConfig) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<MonitorConfig>, RepositoryError>;

    async fn get(&self, key: &RepoKey) -> Result<Option<MonitorConfig>, RepositoryError>;

    /// Removes the configuration; returns whether one existed.
    async fn delete(&self, key: &RepoKey) -> Result<bool, RepositoryError>;
}

/// Applies the `(date desc, sha asc)` ordering and page slicing shared by the
/// in-memory store.
pub(crate) fn sort_and_page(mut commits: Vec<Commit>, filter: &CommitFilter) -> Vec<Commit> {
    commits.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.sha.cmp(&b.sha)));
    commits
        .into_iter()
        .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
        .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
        .collect()
}
