//! In-memory store implementations.
//!
//! Same semantics as the SQL repositories, held in maps behind
//! `tokio::sync::RwLock`. Used by unit tests and by runs that do not need
//! durability.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CommitStore, ConfigStore, sort_and_page};
use crate::error::RepositoryError;
use crate::models::{AuthorAggregate, Commit, CommitFilter, MonitorConfig, RepoKey};

/// Commits grouped per repository, keyed by sha inside each group.
#[derive(Default)]
pub struct InMemoryCommitStore {
    commits: RwLock<HashMap<RepoKey, BTreeMap<String, Commit>>>,
}

impl InMemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits stored for `key`.
    pub async fn len(&self, key: &RepoKey) -> usize {
        self.commits
            .read()
            .await
            .get(key)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CommitStore for InMemoryCommitStore {
    async fn save_commit(&self, commit: &Commit) -> Result<bool, RepositoryError> {
        let mut guard = self.commits.write().await;
        let by_sha = guard.entry(commit.key.clone()).or_default();
        if by_sha.contains_key(&commit.sha) {
            return Ok(false);
        }
        by_sha.insert(commit.sha.clone(), commit.clone());
        Ok(true)
    }

    async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>, RepositoryError> {
        let guard = self.commits.read().await;
        let matching = guard
            .get(&filter.key)
            .map(|by_sha| {
                by_sha
                    .values()
                    .filter(|c| filter.contains(&c.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(sort_and_page(matching, filter))
    }

    async fn get_last_commit(
        &self,
        key: &RepoKey,
        since_hint: Option<DateTime<Utc>>,
    ) -> Result<Option<Commit>, RepositoryError> {
        let guard = self.commits.read().await;
        let latest = guard.get(key).and_then(|by_sha| {
            by_sha
                .values()
                .filter(|c| since_hint.is_none_or(|since| c.date >= since))
                // Greatest date wins; ties go to the smallest sha, as in listings.
                .min_by(|a, b| b.date.cmp(&a.date).then_with(|| a.sha.cmp(&b.sha)))
                .cloned()
        });
        Ok(latest)
    }

    async fn get_commit_by_sha(
        &self,
        key: &RepoKey,
        sha: &str,
    ) -> Result<Option<Commit>, RepositoryError> {
        let guard = self.commits.read().await;
        Ok(guard.get(key).and_then(|by_sha| by_sha.get(sha)).cloned())
    }

    async fn get_top_authors(
        &self,
        filter: &CommitFilter,
    ) -> Result<Vec<AuthorAggregate>, RepositoryError> {
        let guard = self.commits.read().await;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        if let Some(by_sha) = guard.get(&filter.key) {
            for commit in by_sha.values().filter(|c| filter.contains(&c.date)) {
                *counts.entry(commit.author.as_str()).or_default() += 1;
            }
        }

        let mut ranked: Vec<(&str, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(ranked
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .map(|(author, commit_count)| AuthorAggregate {
                key: filter.key.clone(),
                author: author.to_string(),
                commit_count,
            })
            .collect())
    }
}

/// Monitoring configurations keyed by repository.
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<BTreeMap<RepoKey, MonitorConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn save(&self, config: &MonitorConfig) -> Result<(), RepositoryError> {
        self.configs
            .write()
            .await
            .insert(config.key.clone(), config.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MonitorConfig>, RepositoryError> {
        Ok(self.configs.read().await.values().cloned().collect())
    }

    async fn get(&self, key: &RepoKey) -> Result<Option<MonitorConfig>, RepositoryError> {
        Ok(self.configs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &RepoKey) -> Result<bool, RepositoryError> {
        Ok(self.configs.write().await.remove(key).is_some())
    }
}
