//! Upstream client trait definition
//!
//! The mirror engine only sees repositories through [`UpstreamClient`]: a
//! paginated commit listing plus the provider's quota report.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::UpstreamError;
use crate::models::{Commit, RepoKey};

/// Parameters for a single commit listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCommitsParams {
    /// Only commits at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only commits before this instant.
    pub until: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl ListCommitsParams {
    pub fn first_page(per_page: u32) -> Self {
        Self {
            since: None,
            until: None,
            page: 1,
            per_page,
        }
    }
}

/// One page of upstream commits plus the quota observed with it.
#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    pub commits: Vec<Commit>,
    /// Next page to request, `None` when the listing is exhausted.
    pub next_page: Option<u32>,
    pub rate_remaining: Option<u32>,
    pub rate_reset: Option<DateTime<Utc>>,
}

/// Remaining quota and the instant it resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Adapter over the remote source-control provider.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// List commits on the default branch of `key`, newest first.
    async fn list_commits(
        &self,
        key: &RepoKey,
        params: &ListCommitsParams,
    ) -> Result<CommitPage, UpstreamError>;

    /// Report the current quota without consuming it.
    async fn rate_limit(&self) -> Result<RateLimitInfo, UpstreamError>;
}
