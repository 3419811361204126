//! # Query Service
//!
//! Read path over the commit store. Reads never wait for in-flight mirror
//! runs. The first empty listing for a given filter triggers one best-effort
//! mirror of the same window and a single re-query; later calls with that
//! filter read the store as is. A cancelled warm-up does not count.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::mirror::MirrorEngine;
use crate::models::{AuthorAggregate, Commit, CommitFilter, RepoKey};
use crate::repositories::CommitStore;

const WARMED_FILTERS_CAPACITY: usize = 4096;

pub struct QueryService {
    commits: Arc<dyn CommitStore>,
    mirror: Arc<MirrorEngine>,
    warmed: Mutex<LruCache<CommitFilter, ()>>,
}

impl QueryService {
    pub fn new(commits: Arc<dyn CommitStore>, mirror: Arc<MirrorEngine>) -> Self {
        let capacity = NonZeroUsize::new(WARMED_FILTERS_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            commits,
            mirror,
            warmed: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Commits ordered by `date desc, sha asc`.
    pub async fn list_commits(
        &self,
        filter: &CommitFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Commit>, MonitorError> {
        let commits = self.commits.list_commits(filter).await?;
        if !commits.is_empty() || !self.claim_warm_up(filter) {
            return Ok(commits);
        }

        debug!(repo = %filter.key, "empty listing; warming up from upstream");
        match self.mirror.mirror(&filter.key, filter.window(), cancel).await {
            Ok(_) => {}
            Err(MonitorError::Cancelled) => {
                self.release_warm_up(filter);
                return Err(MonitorError::Cancelled);
            }
            // The warm-up is best effort; callers still get the store's view.
            Err(err) => warn!(repo = %filter.key, error = %err, "query warm-up failed"),
        }

        Ok(self.commits.list_commits(filter).await?)
    }

    pub async fn get_commit_by_sha(&self, key: &RepoKey, sha: &str) -> Result<Commit, MonitorError> {
        self.commits
            .get_commit_by_sha(key, sha)
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("commit {} in {}", sha, key)))
    }

    /// Authors ordered by `commitCount desc, author asc`.
    pub async fn top_authors(
        &self,
        filter: &CommitFilter,
    ) -> Result<Vec<AuthorAggregate>, MonitorError> {
        Ok(self.commits.get_top_authors(filter).await?)
    }

    /// True exactly once per filter (until evicted).
    fn claim_warm_up(&self, filter: &CommitFilter) -> bool {
        let mut warmed = self
            .warmed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if warmed.contains(filter) {
            return false;
        }
        warmed.put(filter.clone(), ());
        true
    }

    fn release_warm_up(&self, filter: &CommitFilter) {
        self.warmed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .pop(filter);
    }
}
