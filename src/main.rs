//! # Commit Monitor Main Entry Point
//!
//! Wires the stores, the mirror pipeline and the HTTP surface together and
//! runs them until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use commit_monitor::{
    config::ConfigLoader,
    connectors::{GitHubClient, UpstreamClient},
    db,
    events::{EventBus, EventHandlers},
    mirror::MirrorEngine,
    query::QueryService,
    registry::JobRegistry,
    repositories::{CommitRepository, CommitStore, ConfigStore, CronTaskRepository},
    scheduler::MonitorScheduler,
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "commit-monitor", version, about = "Mirror and monitor upstream repository commits")]
struct Cli {
    /// Directory holding the layered `.env` files
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let loader = cli
        .config_dir
        .map(ConfigLoader::with_base_dir)
        .unwrap_or_default();
    let mut config = loader.load().context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    telemetry::init_tracing(&config).context("initializing telemetry")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(configuration = %redacted_json, "Effective configuration");
    }

    let commit_db = db::open_commit_database(&config)
        .await
        .context("opening commit store")?;
    let cron_db = db::open_cron_database(&config)
        .await
        .context("opening config store")?;

    let events = EventBus::new(config.event_bus.buffer);
    let upstream: Arc<dyn UpstreamClient> =
        Arc::new(GitHubClient::from_config(&config).context("building GitHub client")?);
    let commits: Arc<dyn CommitStore> = Arc::new(CommitRepository::new(commit_db));
    let configs: Arc<dyn ConfigStore> = Arc::new(CronTaskRepository::new(cron_db));

    let mirror = Arc::new(MirrorEngine::new(
        upstream,
        Arc::clone(&commits),
        events.clone(),
        config.mirror.clone(),
    ));
    let registry = Arc::new(JobRegistry::new(Arc::clone(&mirror)));
    let _subscriptions =
        EventHandlers::new(Arc::clone(&mirror), Arc::clone(&registry)).listen(&events);

    let scheduler = Arc::new(MonitorScheduler::new(
        configs,
        registry,
        Arc::clone(&mirror),
        events,
        config.scheduler.clone(),
    ));
    let query = Arc::new(QueryService::new(commits, mirror));

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        scheduler,
        query,
    };

    let server_token = shutdown.clone();
    let served = run_server(&config, state, async move {
        server_token.cancelled().await;
    })
    .await;

    // Stop the pollers even when the listener failed.
    shutdown.cancel();
    match scheduler_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "scheduler exited with an error"),
        Err(err) => error!(error = %err, "scheduler task panicked"),
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
