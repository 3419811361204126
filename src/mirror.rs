//! # Mirror Engine
//!
//! Incremental, rate-limit aware ingestion of upstream commits into the
//! commit store. A run pages through the upstream listing newest first,
//! upserts every commit by `(owner, repo, sha)` and publishes one
//! `COMMIT_CREATED` event per row that was not already stored, so running
//! the same window twice persists nothing the second time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::MirrorConfig;
use crate::connectors::{CommitPage, ListCommitsParams, RateLimitInfo, UpstreamClient};
use crate::error::{MonitorError, UpstreamError};
use crate::events::{EventBus, topics};
use crate::models::{MirrorWindow, RepoKey};
use crate::repositories::CommitStore;

/// Summary of one successful mirror run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorOutcome {
    /// Commits that were not in the store before this run.
    pub new_rows: u64,
    /// Upstream pages consumed.
    pub pages: u32,
    /// Commits returned by upstream, new or not.
    pub fetched: u64,
}

/// Pulls commits for one repository window at a time.
pub struct MirrorEngine {
    upstream: Arc<dyn UpstreamClient>,
    commits: Arc<dyn CommitStore>,
    events: EventBus,
    config: MirrorConfig,
}

impl MirrorEngine {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        commits: Arc<dyn CommitStore>,
        events: EventBus,
        config: MirrorConfig,
    ) -> Self {
        Self {
            upstream,
            commits,
            events,
            config,
        }
    }

    /// Read access to the store this engine writes to.
    pub fn commit_store(&self) -> &Arc<dyn CommitStore> {
        &self.commits
    }

    /// Mirror `window` of `key`'s history.
    ///
    /// An absent `since` resumes from the latest stored commit (inclusive);
    /// an empty store means full history. Rate limits and transient upstream
    /// failures are absorbed up to the configured ceiling and attempt budget;
    /// permanent upstream failures, store failures and cancellation end the
    /// run immediately.
    #[instrument(skip(self, key, cancel), fields(repo = %key))]
    pub async fn mirror(
        &self,
        key: &RepoKey,
        window: MirrorWindow,
        cancel: &CancellationToken,
    ) -> Result<MirrorOutcome, MonitorError> {
        let started = Instant::now();
        let result = self.run(key, window, cancel).await;

        let outcome_label = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        counter!("mirror_runs_total", "outcome" => outcome_label).increment(1);

        match &result {
            Ok(outcome) => info!(
                new_rows = outcome.new_rows,
                fetched = outcome.fetched,
                pages = outcome.pages,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "mirror run completed"
            ),
            Err(MonitorError::Cancelled) => debug!("mirror run cancelled"),
            Err(err) => warn!(error = %err, kind = err.kind(), "mirror run failed"),
        }

        result
    }

    async fn run(
        &self,
        key: &RepoKey,
        window: MirrorWindow,
        cancel: &CancellationToken,
    ) -> Result<MirrorOutcome, MonitorError> {
        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        let since = match window.since {
            Some(since) => Some(since),
            None => self
                .commits
                .get_last_commit(key, None)
                .await?
                .map(|latest| latest.date),
        };

        let mut params = ListCommitsParams::first_page(self.config.page_size);
        params.since = since;
        params.until = window.until;
        debug!(since = ?params.since, until = ?params.until, "effective mirror window");

        let mut outcome = MirrorOutcome::default();
        // The first page asks for the quota explicitly; later pages reuse
        // what the previous response reported.
        let mut quota: Option<RateLimitInfo> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            let current = match quota {
                Some(info) => info,
                None => self.fetch_quota(cancel).await?,
            };
            self.wait_for_quota(&current, cancel).await?;

            let page = self.list_with_retry(key, &params, cancel).await?;
            outcome.pages += 1;
            outcome.fetched += page.commits.len() as u64;

            for commit in &page.commits {
                if cancel.is_cancelled() {
                    return Err(MonitorError::Cancelled);
                }
                if self.commits.save_commit(commit).await? {
                    outcome.new_rows += 1;
                    counter!("mirror_commits_persisted_total").increment(1);
                    self.events.publish_json(topics::COMMIT_CREATED, commit);
                }
            }

            quota = Some(RateLimitInfo {
                remaining: page.rate_remaining,
                reset: page.rate_reset,
            });

            match page.next_page {
                Some(next) => params.page = next,
                None => break,
            }
        }

        Ok(outcome)
    }

    async fn fetch_quota(&self, cancel: &CancellationToken) -> Result<RateLimitInfo, MonitorError> {
        tokio::select! {
            result = self.upstream.rate_limit() => match result {
                Ok(info) => Ok(info),
                // Quota probing is advisory; the list call reports limits itself.
                Err(UpstreamError::Transient(message)) => {
                    debug!(%message, "rate limit probe failed; proceeding");
                    Ok(RateLimitInfo::default())
                }
                // A limited probe means the quota is spent; the wait below decides.
                Err(UpstreamError::RateLimited { reset }) => Ok(RateLimitInfo {
                    remaining: Some(0),
                    reset,
                }),
                Err(err) => Err(err.into()),
            },
            _ = cancel.cancelled() => Err(MonitorError::Cancelled),
        }
    }

    /// Sleep until the quota resets when it is exhausted.
    async fn wait_for_quota(
        &self,
        info: &RateLimitInfo,
        cancel: &CancellationToken,
    ) -> Result<(), MonitorError> {
        if !info.is_exhausted() {
            return Ok(());
        }

        let Some(reset) = info.reset else {
            return Err(MonitorError::TransientUpstream(
                "rate limit exhausted without a reset instant".to_string(),
            ));
        };

        let wait = (reset - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let ceiling = self.config.rate_limit_ceiling();
        if wait > ceiling {
            warn!(
                reset = %reset,
                wait_secs = wait.as_secs(),
                ceiling_secs = ceiling.as_secs(),
                "rate limit reset beyond ceiling"
            );
            return Err(MonitorError::TransientUpstream(format!(
                "rate limit resets in {}s, above the {}s ceiling",
                wait.as_secs(),
                ceiling.as_secs()
            )));
        }

        info!(wait_ms = wait.as_millis() as u64, reset = %reset, "rate limited; sleeping until reset");
        histogram!("mirror_rate_limit_wait_ms").record(wait.as_millis() as f64);
        sleep_or_cancel(wait, cancel).await
    }

    async fn list_with_retry(
        &self,
        key: &RepoKey,
        params: &ListCommitsParams,
        cancel: &CancellationToken,
    ) -> Result<CommitPage, MonitorError> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                result = self.upstream.list_commits(key, params) => result,
                _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            };

            let error = match result {
                Ok(page) => return Ok(page),
                Err(err @ UpstreamError::Permanent { .. }) => return Err(err.into()),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(attempt, page = params.page, error = %error, "upstream retries exhausted");
                return Err(MonitorError::TransientUpstream(error.to_string()));
            }

            let delay = match &error {
                UpstreamError::RateLimited { reset: Some(reset) } => {
                    let wait = (*reset - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    let ceiling = self.config.rate_limit_ceiling();
                    if wait > ceiling {
                        warn!(
                            reset = %reset,
                            wait_secs = wait.as_secs(),
                            ceiling_secs = ceiling.as_secs(),
                            "rate limit reset beyond ceiling"
                        );
                        return Err(MonitorError::TransientUpstream(format!(
                            "rate limit resets in {}s, above the {}s ceiling",
                            wait.as_secs(),
                            ceiling.as_secs()
                        )));
                    }
                    histogram!("mirror_rate_limit_wait_ms").record(wait.as_millis() as f64);
                    wait
                }
                _ => sample_backoff(attempt, &self.config),
            };

            debug!(
                attempt,
                page = params.page,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying upstream list call"
            );
            sleep_or_cancel(delay, cancel).await?;
            attempt += 1;
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), MonitorError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(MonitorError::Cancelled),
    }
}

fn sample_backoff(attempt: u32, config: &MirrorConfig) -> Duration {
    let mut rng = rand::thread_rng();
    compute_backoff(attempt, config, &mut rng)
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
/// scaled by a uniform factor in `1 ± jitter`, then capped.
fn compute_backoff<R: Rng + ?Sized>(attempt: u32, config: &MirrorConfig, rng: &mut R) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let base_ms = config.retry_base_ms.saturating_mul(1u64 << exponent) as f64;

    let jitter = config.retry_jitter.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
    };

    let delay_ms = (base_ms * factor).round().min(config.retry_cap_ms as f64);
    Duration::from_millis(delay_ms.max(0.0) as u64)
}
