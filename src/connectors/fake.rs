//! Scripted in-process upstream used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::trait_::{CommitPage, ListCommitsParams, RateLimitInfo, UpstreamClient};
use crate::error::UpstreamError;
use crate::models::{Commit, RepoKey};

#[derive(Default)]
pub(crate) struct FakeUpstream {
    commits: Mutex<HashMap<RepoKey, Vec<Commit>>>,
    failures: Mutex<VecDeque<UpstreamError>>,
    rate_limits: Mutex<VecDeque<RateLimitInfo>>,
    list_calls: AtomicUsize,
    requested: Mutex<Vec<ListCommitsParams>>,
}

impl FakeUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a commit to the upstream history of its repository.
    pub(crate) fn push(&self, commit: Commit) {
        let mut guard = self.commits.lock().unwrap();
        let history = guard.entry(commit.key.clone()).or_default();
        history.push(commit);
        history.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.sha.cmp(&b.sha)));
    }

    /// Queues errors returned by the next list calls, in order.
    pub(crate) fn fail_next(&self, error: UpstreamError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Queues quota reports returned by the next `rate_limit` calls.
    pub(crate) fn report_rate_limit(&self, info: RateLimitInfo) {
        self.rate_limits.lock().unwrap().push_back(info);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requested(&self) -> Vec<ListCommitsParams> {
        self.requested.lock().unwrap().clone()
    }
}

pub(crate) fn commit(key: &RepoKey, sha: &str, date: &str) -> Commit {
    Commit {
        key: key.clone(),
        sha: sha.to_string(),
        author: "Ada Lovelace".to_string(),
        message: format!("commit {}", sha),
        date: date.parse::<DateTime<Utc>>().unwrap(),
        url: format!("https://github.com/{}/commit/{}", key, sha),
        parent_shas: Vec::new(),
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn list_commits(
        &self,
        key: &RepoKey,
        params: &ListCommitsParams,
    ) -> Result<CommitPage, UpstreamError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(params.clone());

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let guard = self.commits.lock().unwrap();
        let matching: Vec<Commit> = guard
            .get(key)
            .map(|history| {
                history
                    .iter()
                    .filter(|c| params.since.is_none_or(|since| c.date >= since))
                    .filter(|c| params.until.is_none_or(|until| c.date < until))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let per_page = params.per_page.max(1) as usize;
        let start = (params.page.max(1) as usize - 1) * per_page;
        let commits: Vec<Commit> = matching.iter().skip(start).take(per_page).cloned().collect();
        let next_page = (start + per_page < matching.len()).then_some(params.page + 1);

        Ok(CommitPage {
            commits,
            next_page,
            rate_remaining: Some(5000),
            rate_reset: None,
        })
    }

    async fn rate_limit(&self) -> Result<RateLimitInfo, UpstreamError> {
        Ok(self
            .rate_limits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RateLimitInfo {
                remaining: Some(5000),
                reset: None,
            }))
    }
}
