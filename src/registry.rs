//! # Job Registry
//!
//! Owns exactly one poller task per monitored repository. Pollers fire
//! every `max(1h, pollIntervalHours)` starting one interval after they are
//! added, run the mirror engine serially and swallow every error after
//! logging it. Boot-time catch-up belongs to the scheduler, not here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::MonitorError;
use crate::mirror::MirrorEngine;
use crate::models::{MirrorWindow, MonitorConfig, RepoKey};

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Lifecycle of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Idle,
    Fetching,
    /// Terminal.
    Cancelled,
}

#[derive(Debug)]
struct JobStatus {
    state: JobState,
    next_fire_at: DateTime<Utc>,
}

type SharedStatus = Arc<Mutex<JobStatus>>;

fn lock_status(status: &SharedStatus) -> MutexGuard<'_, JobStatus> {
    status.lock().unwrap_or_else(|poison| poison.into_inner())
}

struct JobHandle {
    monitor: MonitorConfig,
    cancel: CancellationToken,
    status: SharedStatus,
    task: JoinHandle<()>,
}

/// Point-in-time view of a live job.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub key: RepoKey,
    pub poll_interval_hours: u32,
    pub state: JobState,
    #[schema(value_type = String, format = DateTime)]
    pub next_fire_at: DateTime<Utc>,
}

/// In-memory set of active pollers keyed by repository.
pub struct JobRegistry {
    jobs: Mutex<HashMap<RepoKey, JobHandle>>,
    mirror: Arc<MirrorEngine>,
    shutdown: CancellationToken,
}

/// Tick period for a configured interval; never shorter than an hour.
pub fn poll_period(poll_interval_hours: u32) -> Duration {
    HOUR.saturating_mul(poll_interval_hours).max(HOUR)
}

impl JobRegistry {
    pub fn new(mirror: Arc<MirrorEngine>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            mirror,
            shutdown: CancellationToken::new(),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<RepoKey, JobHandle>> {
        self.jobs.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Start a poller for `config`. Any job already registered for the key is
    /// cancelled and replaced while the registry lock is held, so no reader
    /// ever observes the key without a job or with two.
    pub fn add(&self, config: MonitorConfig) {
        let mut jobs = self.lock_jobs();
        let replaced = Self::remove_locked(&mut jobs, &config.key);
        let key = config.key.clone();
        let handle = self.spawn_job(config);
        jobs.insert(key.clone(), handle);
        gauge!("registry_jobs_active").set(jobs.len() as f64);

        info!(repo = %key, replaced, "registered poller");
    }

    /// Cancel and forget the job for `key`. Returns whether one existed.
    pub fn remove(&self, key: &RepoKey) -> bool {
        let mut jobs = self.lock_jobs();
        let removed = Self::remove_locked(&mut jobs, key);
        gauge!("registry_jobs_active").set(jobs.len() as f64);

        if removed {
            info!(repo = %key, "removed poller");
        }
        removed
    }

    /// Replace the job for `config.key`; the remove and the add share one
    /// critical section (see [`JobRegistry::add`]).
    pub fn update(&self, config: MonitorConfig) {
        self.add(config);
    }

    fn remove_locked(jobs: &mut HashMap<RepoKey, JobHandle>, key: &RepoKey) -> bool {
        match jobs.remove(key) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn spawn_job(&self, monitor: MonitorConfig) -> JobHandle {
        let cancel = self.shutdown.child_token();
        let period = poll_period(monitor.poll_interval_hours);
        let status = Arc::new(Mutex::new(JobStatus {
            state: JobState::Idle,
            next_fire_at: next_fire_after(period),
        }));

        let task = tokio::spawn(run_poller(
            monitor.key.clone(),
            period,
            Arc::clone(&self.mirror),
            cancel.clone(),
            Arc::clone(&status),
        ));

        JobHandle {
            monitor,
            cancel,
            status,
            task,
        }
    }

    /// Cancellation handle of the live job for `key`, if any.
    ///
    /// Work done on behalf of a job (such as its initial backfill) should
    /// observe this token so removing the job also stops that work.
    pub fn cancellation_for(&self, key: &RepoKey) -> Option<CancellationToken> {
        self.lock_jobs().get(key).map(|handle| handle.cancel.clone())
    }

    pub fn contains(&self, key: &RepoKey) -> bool {
        self.lock_jobs().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    /// Live jobs ordered by repository.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let jobs = self.lock_jobs();
        let mut snapshots: Vec<JobSnapshot> = jobs
            .values()
            .map(|handle| {
                let status = lock_status(&handle.status);
                JobSnapshot {
                    key: handle.monitor.key.clone(),
                    poll_interval_hours: handle.monitor.poll_interval_hours,
                    state: status.state,
                    next_fire_at: status.next_fire_at,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Cancel every poller and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JobHandle> = {
            let mut jobs = self.lock_jobs();
            jobs.drain().map(|(_, handle)| handle).collect()
        };
        gauge!("registry_jobs_active").set(0.0);

        for handle in handles {
            if let Err(err) = handle.task.await {
                warn!(repo = %handle.monitor.key, error = %err, "poller task ended abnormally");
            }
        }
        info!("job registry shut down");
    }
}

fn next_fire_after(period: Duration) -> DateTime<Utc> {
    let step = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::hours(1));
    Utc::now() + step
}

fn set_state(status: &SharedStatus, state: JobState) {
    lock_status(status).state = state;
}

async fn run_poller(
    key: RepoKey,
    period: Duration,
    mirror: Arc<MirrorEngine>,
    cancel: CancellationToken,
    status: SharedStatus,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // A fetch that overruns the interval delays the next tick instead of queueing one.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(repo = %key, period_secs = period.as_secs(), "poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        set_state(&status, JobState::Fetching);
        let window = MirrorWindow::until(Utc::now());
        let outcome = match mirror.mirror(&key, window, &cancel).await {
            Ok(result) => {
                debug!(repo = %key, new_rows = result.new_rows, "poll tick completed");
                "success"
            }
            Err(MonitorError::Cancelled) => "cancelled",
            Err(err) => {
                warn!(repo = %key, error = %err, kind = err.kind(), "poll tick failed");
                err.kind()
            }
        };
        counter!("registry_ticks_total", "outcome" => outcome).increment(1);

        if cancel.is_cancelled() {
            break;
        }
        {
            let mut current = lock_status(&status);
            current.state = JobState::Idle;
            current.next_fire_at = next_fire_after(period);
        }
    }

    set_state(&status, JobState::Cancelled);
    debug!(repo = %key, "poller stopped");
}
