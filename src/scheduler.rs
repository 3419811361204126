//! # Monitor Scheduler
//!
//! Façade over the config store, the job registry and the event bus.
//! `start_monitoring` persists before it touches the registry; `stop_monitoring`
//! deletes from the store first and cancels the job second, so a crash in
//! between leaves an orphan poller that disappears on restart rather than a
//! durable config without a live job. Each store-then-registry sequence runs
//! under the lifecycle lock, so concurrent starts and stops cannot interleave
//! and leave the two disagreeing. Events are published after the lock is
//! released, and only on success.
//!
//! On start the scheduler rebuilds the job set from the config store and
//! runs one catch-up mirror per config, bounded by
//! `scheduler.boot_parallelism`.

use std::sync::Arc;

use chrono::Utc;
use metrics::histogram;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::MonitorError;
use crate::events::{EventBus, topics};
use crate::mirror::MirrorEngine;
use crate::models::{MirrorWindow, MonitorConfig, RepoKey};
use crate::registry::JobRegistry;
use crate::repositories::ConfigStore;

/// Counts reported by [`MonitorScheduler::boot`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub jobs: usize,
    pub caught_up: usize,
    pub failed: usize,
}

/// Scheduler service wired explicitly into the HTTP layer.
pub struct MonitorScheduler {
    configs: Arc<dyn ConfigStore>,
    registry: Arc<JobRegistry>,
    mirror: Arc<MirrorEngine>,
    events: EventBus,
    config: SchedulerConfig,
    lifecycle: Mutex<()>,
}

impl MonitorScheduler {
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        registry: Arc<JobRegistry>,
        mirror: Arc<MirrorEngine>,
        events: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            configs,
            registry,
            mirror,
            events,
            config,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register (or re-register) `config` for monitoring.
    #[instrument(skip_all, fields(repo = %config.key))]
    pub async fn start_monitoring(&self, config: MonitorConfig) -> Result<(), MonitorError> {
        config.validate(self.config.max_poll_interval_hours)?;

        {
            let _lifecycle = self.lifecycle.lock().await;

            let replaced = self.configs.delete(&config.key).await?;
            if let Err(err) = self.configs.save(&config).await {
                self.registry.remove(&config.key);
                return Err(err.into());
            }

            if replaced {
                debug!("replacing existing monitor configuration");
                self.registry.update(config.clone());
            } else {
                self.registry.add(config.clone());
            }
        }

        self.events.publish_json(topics::MONITOR_TASK_CREATED, &config);
        info!(
            poll_interval_hours = config.poll_interval_hours,
            "monitoring started"
        );
        Ok(())
    }

    /// Stop monitoring `key`. Unknown keys succeed without effect.
    #[instrument(skip_all, fields(repo = %key))]
    pub async fn stop_monitoring(&self, key: &RepoKey) -> Result<(), MonitorError> {
        let existing = {
            let _lifecycle = self.lifecycle.lock().await;

            let Some(existing) = self.configs.get(key).await? else {
                debug!("no monitor configured; nothing to stop");
                return Ok(());
            };
            self.configs.delete(key).await?;
            self.registry.remove(key);
            existing
        };

        self.events.publish_json(topics::MONITOR_TASK_DELETED, &existing);
        info!("monitoring stopped");
        Ok(())
    }

    /// Persisted monitor configurations.
    pub async fn list_monitors(&self) -> Result<Vec<MonitorConfig>, MonitorError> {
        Ok(self.configs.list().await?)
    }

    /// Rebuild the job set from the config store and wait for one catch-up
    /// mirror per job.
    #[instrument(skip_all)]
    pub async fn boot(&self) -> Result<BootReport, MonitorError> {
        let started = Instant::now();

        let registered = {
            let _lifecycle = self.lifecycle.lock().await;
            let configs = self.configs.list().await?;
            info!(count = configs.len(), "rehydrating monitors");

            let mut registered = Vec::with_capacity(configs.len());
            for config in configs {
                let key = config.key.clone();
                if let Err(err) = config.validate(self.config.max_poll_interval_hours) {
                    warn!(repo = %key, error = %err, "skipping invalid stored monitor");
                    continue;
                }

                self.registry.add(config);
                if let Some(cancel) = self.registry.cancellation_for(&key) {
                    registered.push((key, cancel));
                }
            }
            registered
        };

        let semaphore = Arc::new(Semaphore::new(self.config.boot_parallelism.max(1)));
        let mut handles = Vec::with_capacity(registered.len());

        for (key, cancel) in registered {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| MonitorError::Internal("boot semaphore closed".to_string()))?;
            let mirror = Arc::clone(&self.mirror);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let window = MirrorWindow::until(Utc::now());
                match mirror.mirror(&key, window, &cancel).await {
                    Ok(outcome) => {
                        debug!(repo = %key, new_rows = outcome.new_rows, "catch-up completed");
                        true
                    }
                    Err(err) => {
                        warn!(repo = %key, error = %err, "catch-up failed");
                        false
                    }
                }
            }));
        }

        let mut report = BootReport {
            jobs: handles.len(),
            ..BootReport::default()
        };
        for handle in handles {
            match handle.await {
                Ok(true) => report.caught_up += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    error!(error = %err, "catch-up task panicked");
                    report.failed += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        histogram!("scheduler_boot_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            jobs = report.jobs,
            caught_up = report.caught_up,
            failed = report.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "boot completed"
        );
        Ok(report)
    }

    /// Boot, then keep the job set alive until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), MonitorError> {
        info!("Starting monitor scheduler");

        tokio::select! {
            result = self.boot() => {
                if let Err(err) = result {
                    error!(error = %err, "boot failed; continuing with an empty job set");
                }
            }
            _ = shutdown.cancelled() => {
                info!("shutdown requested during boot");
            }
        }

        shutdown.cancelled().await;
        info!("Monitor scheduler shutdown requested");

        self.registry.shutdown().await;
        self.events.close();

        info!("Monitor scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::connectors::fake::{FakeUpstream, commit};
    use crate::models::CommitFilter;
    use migration::{CronStoreMigrator, MigratorTrait};
    use crate::error::RepositoryError;
    use crate::repositories::{
        CommitStore, CronTaskRepository, InMemoryCommitStore, InMemoryConfigStore,
    };
    use std::time::Duration;

    struct Fixture {
        upstream: Arc<FakeUpstream>,
        commits: Arc<InMemoryCommitStore>,
        configs: Arc<dyn ConfigStore>,
        scheduler: MonitorScheduler,
    }

    fn fixture_with(configs: Arc<dyn ConfigStore>) -> Fixture {
        let upstream = Arc::new(FakeUpstream::new());
        let commits = Arc::new(InMemoryCommitStore::new());
        let events = EventBus::new(16);
        let mirror = Arc::new(MirrorEngine::new(
            upstream.clone(),
            commits.clone(),
            events.clone(),
            MirrorConfig::default(),
        ));
        let registry = Arc::new(JobRegistry::new(Arc::clone(&mirror)));
        let scheduler = MonitorScheduler::new(
            Arc::clone(&configs),
            registry,
            mirror,
            events,
            SchedulerConfig::default(),
        );
        Fixture {
            upstream,
            commits,
            configs,
            scheduler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryConfigStore::new()))
    }

    fn acme() -> RepoKey {
        RepoKey::new("acme", "widget")
    }

    fn monitor(key: RepoKey, hours: u32) -> MonitorConfig {
        MonitorConfig {
            key,
            from_date: None,
            to_date: None,
            poll_interval_hours: hours,
        }
    }

    fn seed_three(upstream: &FakeUpstream, key: &RepoKey) {
        upstream.push(commit(key, "a", "2024-01-01T00:00:00Z"));
        upstream.push(commit(key, "b", "2024-01-02T00:00:00Z"));
        upstream.push(commit(key, "c", "2024-01-03T00:00:00Z"));
    }

    async fn listed_shas(commits: &InMemoryCommitStore, key: &RepoKey) -> Vec<String> {
        commits
            .list_commits(&CommitFilter::new(key.clone()))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.sha)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_poll() {
        let f = fixture();
        seed_three(&f.upstream, &acme());

        f.scheduler.start_monitoring(monitor(acme(), 1)).await.unwrap();
        let report = f.scheduler.boot().await.unwrap();

        assert_eq!(report.caught_up, 1);
        assert_eq!(listed_shas(&f.commits, &acme()).await, vec!["c", "b", "a"]);
        f.scheduler.registry().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_re_registration() {
        let f = fixture();
        seed_three(&f.upstream, &acme());

        for _ in 0..2 {
            f.scheduler.start_monitoring(monitor(acme(), 1)).await.unwrap();
            f.scheduler.boot().await.unwrap();
        }

        assert_eq!(f.configs.list().await.unwrap().len(), 1);
        assert_eq!(f.scheduler.registry().len(), 1);
        assert_eq!(f.commits.len(&acme()).await, 3);
        f.scheduler.registry().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_polling() {
        let f = fixture();
        seed_three(&f.upstream, &acme());
        f.scheduler.start_monitoring(monitor(acme(), 1)).await.unwrap();
        f.scheduler.boot().await.unwrap();

        f.scheduler.stop_monitoring(&acme()).await.unwrap();
        f.upstream.push(commit(&acme(), "d", "2024-01-04T00:00:00Z"));
        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;

        let last = f.commits.get_last_commit(&acme(), None).await.unwrap().unwrap();
        assert_eq!(last.sha, "c");
        assert!(f.configs.get(&acme()).await.unwrap().is_none());
        assert!(!f.scheduler.registry().contains(&acme()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_registration_replaces_poll_interval() {
        let f = fixture();
        f.scheduler.start_monitoring(monitor(acme(), 1)).await.unwrap();
        f.scheduler.start_monitoring(monitor(acme(), 6)).await.unwrap();

        let snapshot = f.scheduler.registry().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].poll_interval_hours, 6);
        let stored = f.configs.get(&acme()).await.unwrap().unwrap();
        assert_eq!(stored.poll_interval_hours, 6);
        f.scheduler.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_key_is_noop() {
        let f = fixture();
        f.scheduler.stop_monitoring(&acme()).await.unwrap();
        assert!(f.scheduler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_persisting() {
        let f = fixture();
        let result = f.scheduler.start_monitoring(monitor(acme(), 0)).await;

        assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
        assert!(f.configs.list().await.unwrap().is_empty());
        assert!(f.scheduler.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_and_registry_agree_after_each_operation() {
        let f = fixture();
        let ops: [(bool, u32); 6] = [(true, 1), (true, 3), (false, 0), (false, 0), (true, 2), (false, 0)];

        for (start, hours) in ops {
            if start {
                f.scheduler.start_monitoring(monitor(acme(), hours)).await.unwrap();
            } else {
                f.scheduler.stop_monitoring(&acme()).await.unwrap();
            }
            let stored = f.configs.get(&acme()).await.unwrap().is_some();
            assert_eq!(stored, f.scheduler.registry().contains(&acme()));
        }
        f.scheduler.registry().shutdown().await;
    }

    /// Config store whose `save` parks after writing until released.
    struct GatedConfigStore {
        inner: InMemoryConfigStore,
        saved: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ConfigStore for GatedConfigStore {
        async fn save(&self, config: &MonitorConfig) -> Result<(), RepositoryError> {
            self.inner.save(config).await?;
            self.saved.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn list(&self) -> Result<Vec<MonitorConfig>, RepositoryError> {
            self.inner.list().await
        }

        async fn get(&self, key: &RepoKey) -> Result<Option<MonitorConfig>, RepositoryError> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &RepoKey) -> Result<bool, RepositoryError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_start_leaves_store_and_registry_in_agreement() {
        let gated = Arc::new(GatedConfigStore {
            inner: InMemoryConfigStore::new(),
            saved: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let f = fixture_with(gated.clone());
        let scheduler = Arc::new(f.scheduler);

        let start = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.start_monitoring(monitor(acme(), 1)).await }
        });
        gated.saved.notified().await;

        // The row is written but the job is not registered yet.
        let stop = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.stop_monitoring(&acme()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!stop.is_finished());

        gated.release.notify_one();
        start.await.unwrap().unwrap();
        stop.await.unwrap().unwrap();

        let stored = f.configs.get(&acme()).await.unwrap().is_some();
        assert_eq!(stored, scheduler.registry().contains(&acme()));
        assert!(!stored);
        scheduler.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_recovery_from_durable_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cron.db").display());
        let gadget = RepoKey::new("acme", "gadget");

        {
            let db = sea_orm::Database::connect(url.as_str()).await.unwrap();
            CronStoreMigrator::up(&db, None).await.unwrap();
            let f = fixture_with(Arc::new(CronTaskRepository::new(db)));
            f.scheduler.start_monitoring(monitor(acme(), 1)).await.unwrap();
            f.scheduler.start_monitoring(monitor(gadget.clone(), 2)).await.unwrap();
            // Simulated crash: nothing is shut down cleanly.
        }

        let db = sea_orm::Database::connect(url.as_str()).await.unwrap();
        let f = fixture_with(Arc::new(CronTaskRepository::new(db)));
        seed_three(&f.upstream, &acme());
        f.upstream.push(commit(&gadget, "g1", "2024-02-01T00:00:00Z"));

        let report = f.scheduler.boot().await.unwrap();

        assert_eq!(report.jobs, 2);
        assert_eq!(report.caught_up, 2);
        assert_eq!(f.scheduler.registry().len(), 2);
        assert_eq!(f.commits.len(&acme()).await, 3);
        assert_eq!(f.commits.len(&gadget).await, 1);
        f.scheduler.registry().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_jobs_on_shutdown() {
        let f = fixture();
        f.configs.save(&monitor(acme(), 1)).await.unwrap();
        let scheduler = Arc::new(f.scheduler);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.registry().len(), 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert!(scheduler.registry().is_empty());
    }
}
