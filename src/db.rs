//! Database connection and pool management.
//!
//! The service keeps two independent databases: the commit mirror and the
//! monitoring configuration ("cron") store. Each is addressed by a database
//! name which is either a full connection URL or a bare SQLite file name.

use anyhow::{Context, Result};
use migration::{CommitStoreMigrator, CronStoreMigrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Turns a configured database name into a connection URL.
///
/// Values containing `://` (or an explicit `sqlite:` scheme) are used as-is;
/// anything else names a SQLite file that is created on first use.
pub fn resolve_database_url(name: &str) -> String {
    let name = name.trim();
    if name.contains("://") || name.starts_with("sqlite:") {
        name.to_string()
    } else {
        format!("sqlite://{}?mode=rwc", name)
    }
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

/// Opens a pooled connection for `database_name`, retrying transient failures
/// with exponential backoff.
pub async fn init_pool(cfg: &AppConfig, database_name: &str) -> Result<DatabaseConnection> {
    if database_name.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database name cannot be empty".to_string(),
        }
        .into());
    }

    let url = resolve_database_url(database_name);

    // Every connection to an in-memory SQLite database sees its own empty
    // database, so the pool must not grow past one.
    let max_connections = if is_in_memory(&url) {
        1
    } else {
        cfg.db_max_connections
    };

    let mut opt = ConnectOptions::new(&url);
    opt.max_connections(max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!(
                    "Connected to database {} (attempt {})",
                    database_name,
                    attempt
                );
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to database {} after {} attempts: {}",
                        database_name,
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Database {} connection attempt {} failed: {}, retrying in {:?}",
                    database_name,
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Connects to the commit database and applies its migrations.
pub async fn open_commit_database(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let db = init_pool(cfg, &cfg.commit_database_name).await?;
    CommitStoreMigrator::up(&db, None)
        .await
        .context("failed to migrate commit database")?;
    Ok(db)
}

/// Connects to the monitoring configuration database and applies its migrations.
pub async fn open_cron_database(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let db = init_pool(cfg, &cfg.cron_database_name).await?;
    CronStoreMigrator::up(&db, None)
        .await
        .context("failed to migrate cron database")?;
    Ok(db)
}

/// Health check for the database connection.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}
