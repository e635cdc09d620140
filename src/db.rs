//! Database connection and pool management.
//!
//! Initializes the SeaORM connection pool with bounded retries and provides
//! the readiness probes used by the health endpoints and the `wait-db` command.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
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
    #[error("Database not ready after {attempts} attempts: {last_error}")]
    NotReady { attempts: u32, last_error: String },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

fn connect_options(cfg: &AppConfig) -> ConnectOptions {
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600)) // 10 minutes
        .max_lifetime(Duration::from_secs(1800)) // 30 minutes
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    opt
}

/// Initializes a database connection pool with the given configuration.
///
/// Transient connection failures are retried `db_connect_retries` times with
/// exponential backoff starting at 100ms.
///
/// ```no_run
/// use detecktiv::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let opt = connect_options(cfg);
    let max_retries = cfg.db_connect_retries.max(1);
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) if attempt == max_retries => {
                log::error!(
                    "Failed to connect to database after {} attempts: {}",
                    max_retries,
                    e
                );
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
            Err(e) => {
                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::NotReady {
        attempts: max_retries,
        last_error: "no connection attempt completed".to_string(),
    }
    .into())
}

/// Health check for the database connection (`SELECT 1`).
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

/// Waits until the database accepts connections and answers `SELECT 1`.
///
/// Each attempt opens a fresh single-connection pool so a database that is
/// still starting up is probed cleanly.
pub async fn wait_for_database(
    cfg: &AppConfig,
    attempts: u32,
    delay: Duration,
) -> Result<(), DatabaseError> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let mut opt = connect_options(cfg);
        opt.max_connections(1);

        let probe = async {
            let conn = Database::connect(opt).await?;
            let result = health_check(&conn).await;
            let _ = conn.close().await;
            result
        };

        match probe.await {
            Ok(()) => {
                tracing::info!(attempt, "database is ready");
                return Ok(());
            }
            Err(err) => {
                last_error = format!("{:#}", err);
                tracing::warn!(attempt, attempts, error = %last_error, "database not ready yet");
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }

    Err(DatabaseError::NotReady {
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_database_url() {
        let config = AppConfig {
            database_url: String::new(),
            ..Default::default()
        };

        let result = init_pool(&config).await;
        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn sqlite_memory_pool_passes_health_check() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..Default::default()
        };

        let db = init_pool(&config).await.expect("sqlite pool");
        health_check(&db).await.expect("SELECT 1 succeeds");
    }

    #[tokio::test]
    async fn wait_for_database_succeeds_for_reachable_database() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };

        wait_for_database(&config, 2, Duration::from_millis(10))
            .await
            .expect("sqlite is immediately ready");
    }

    #[tokio::test]
    async fn wait_for_database_gives_up_after_attempts() {
        let config = AppConfig {
            database_url: "sqlite:///nonexistent-dir/for/sure/app.db?mode=ro".to_string(),
            db_acquire_timeout_ms: 200,
            ..Default::default()
        };

        let err = wait_for_database(&config, 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotReady { attempts: 2, .. }));
    }
}
