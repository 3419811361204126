//! GitHub upstream client
//!
//! REST adapter for `GET /repos/{owner}/{repo}/commits` and `GET /rate_limit`.
//! Responses are classified into the [`UpstreamError`] kinds the mirror
//! engine understands; pagination follows the `Link` header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::connectors::trait_::{CommitPage, ListCommitsParams, RateLimitInfo, UpstreamClient};
use crate::error::UpstreamError;
use crate::models::{Commit, RepoKey};

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("gitbeam-commit-monitor/", env!("CARGO_PKG_VERSION"));

/// GitHub REST client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Create a client against `base_url` (trailing slashes are ignored).
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.github_api_base.clone(),
            config.github_token.clone(),
            config.request_timeout(),
        )
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.get(url).header("Accept", ACCEPT_HEADER);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    fn commits_url(&self, key: &RepoKey, params: &ListCommitsParams) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{}/{}/commits",
            self.base_url, key.owner_name, key.repo_name
        ))
        .map_err(|e| UpstreamError::Permanent {
            status: 0,
            message: format!("invalid commits URL: {}", e),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("per_page", &params.per_page.to_string())
                .append_pair("page", &params.page.to_string());
            if let Some(since) = params.since {
                query.append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            if let Some(until) = params.until {
                query.append_pair("until", &until.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl UpstreamClient for GitHubClient {
    async fn list_commits(
        &self,
        key: &RepoKey,
        params: &ListCommitsParams,
    ) -> Result<CommitPage, UpstreamError> {
        let url = self.commits_url(key, params)?;
        let response = self.request(url).send().await.map_err(classify_transport)?;

        let rate = extract_rate_limit_info(&response);
        let next_page = response
            .headers()
            .get("Link")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_next_link)
            .map(|next| page_of(&next).unwrap_or(params.page + 1));

        if response.status() == StatusCode::CONFLICT {
            // GitHub answers 409 "Git Repository is empty" for repositories without commits.
            debug!(repo = %key, "upstream repository is empty");
            return Ok(CommitPage {
                rate_remaining: rate.remaining,
                rate_reset: rate.reset,
                ..CommitPage::default()
            });
        }

        let response = check_status(response, &rate).await?;
        let raw: Vec<GitHubCommit> = response.json().await.map_err(classify_transport)?;

        let commits = raw
            .into_iter()
            .filter_map(|item| item.into_commit(key))
            .collect();

        Ok(CommitPage {
            commits,
            next_page,
            rate_remaining: rate.remaining,
            rate_reset: rate.reset,
        })
    }

    async fn rate_limit(&self) -> Result<RateLimitInfo, UpstreamError> {
        let url = Url::parse(&format!("{}/rate_limit", self.base_url)).map_err(|e| {
            UpstreamError::Permanent {
                status: 0,
                message: format!("invalid rate limit URL: {}", e),
            }
        })?;

        let response = self.request(url).send().await.map_err(classify_transport)?;
        let header_rate = extract_rate_limit_info(&response);
        let response = check_status(response, &header_rate).await?;
        let body: GitHubRateLimitResponse = response.json().await.map_err(classify_transport)?;

        let core = body
            .resources
            .and_then(|r| r.core)
            .or(body.rate)
            .unwrap_or_default();

        Ok(RateLimitInfo {
            remaining: core.remaining.or(header_rate.remaining),
            reset: core
                .reset
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .or(header_rate.reset),
        })
    }
}

/// Maps non-success statuses onto upstream error kinds.
async fn check_status(response: Response, rate: &RateLimitInfo) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && rate.is_exhausted())
    {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        let reset = retry_after.or(rate.reset);
        warn!(status = status.as_u16(), ?reset, "rate limited by GitHub API");
        return Err(UpstreamError::RateLimited { reset });
    }

    let body = response.text().await.unwrap_or_default();
    let snippet = truncate(&body, 200);

    if status.is_server_error() {
        warn!(status = status.as_u16(), body = %snippet, "GitHub API server error");
        return Err(UpstreamError::Transient(format!(
            "GitHub API server error: {}",
            status
        )));
    }

    Err(UpstreamError::Permanent {
        status: status.as_u16(),
        message: snippet,
    })
}

fn classify_transport(error: reqwest::Error) -> UpstreamError {
    if let Some(status) = error.status()
        && status.is_client_error()
    {
        return UpstreamError::Permanent {
            status: status.as_u16(),
            message: error.to_string(),
        };
    }
    UpstreamError::Transient(error.to_string())
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        let truncated: String = body.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

/// Extract the `rel="next"` target from a GitHub `Link` header.
fn parse_next_link(link_header: &str) -> Option<String> {
    // Format: <https://api.github.com/resource?page=2>; rel="next", <...>; rel="last"
    for link in link_header.split(',') {
        let mut parts = link.split(';');
        let url_part = parts.next()?.trim();
        if parts.any(|p| p.trim() == "rel=\"next\"")
            && let Some(url) = url_part
                .strip_prefix('<')
                .and_then(|rest| rest.strip_suffix('>'))
        {
            return Some(url.to_string());
        }
    }
    None
}

fn page_of(url: &str) -> Option<u32> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}

fn extract_rate_limit_info(response: &Response) -> RateLimitInfo {
    RateLimitInfo {
        remaining: response
            .headers()
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
        reset: response
            .headers()
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0)),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: GitHubCommitDetail,
    #[serde(default)]
    parents: Vec<GitHubParent>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    #[serde(default)]
    message: String,
    author: Option<GitHubSignature>,
    committer: Option<GitHubSignature>,
}

#[derive(Debug, Deserialize)]
struct GitHubSignature {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitHubParent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRateLimitResponse {
    resources: Option<GitHubRateResources>,
    rate: Option<GitHubRate>,
}

#[derive(Debug, Deserialize)]
struct GitHubRateResources {
    core: Option<GitHubRate>,
}

#[derive(Debug, Default, Deserialize)]
struct GitHubRate {
    remaining: Option<u32>,
    reset: Option<i64>,
}

impl GitHubCommit {
    fn into_commit(self, key: &RepoKey) -> Option<Commit> {
        let GitHubCommitDetail {
            message,
            author,
            committer,
        } = self.commit;

        let name_of = |sig: &Option<GitHubSignature>| {
            sig.as_ref()
                .and_then(|s| s.name.clone())
                .filter(|n| !n.is_empty())
        };
        let author_name = name_of(&committer)
            .or_else(|| name_of(&author))
            .unwrap_or_else(|| "unknown".to_string());

        let Some(date) = committer
            .as_ref()
            .and_then(|s| s.date)
            .or_else(|| author.as_ref().and_then(|s| s.date))
        else {
            warn!(repo = %key, sha = %self.sha, "skipping upstream commit without a date");
            return None;
        };

        Some(Commit {
            key: key.clone(),
            sha: self.sha,
            author: author_name,
            message,
            date,
            url: self.html_url,
            parent_shas: self.parents.into_iter().map(|p| p.sha).collect(),
        })
    }
}
