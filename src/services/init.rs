//! Initialization helpers for the application:
//! - database connection + migrations
//! - outbound gateway construction
//! - background worker spawn helpers

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;
use crate::db::Channel;
use crate::services::gateway::Gateways;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool (creating the file and its directory if needed) and
/// run the embedded migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the channel gateways from configuration.
///
/// Missing credentials are not fatal: the channel is left unconfigured and
/// the dispatcher degrades according to the deployment mode.
pub fn build_gateways(config: &Config) -> Result<Gateways> {
    let gateways = Gateways::from_config(&config.gateway)?;

    for channel in Channel::ALL {
        if gateways.is_configured(channel) {
            tracing::info!("{} gateway configured", channel);
        } else if config.deployment.mode.is_production() {
            tracing::warn!(
                "{} gateway not configured; {} notifications will be recorded as failed",
                channel,
                channel
            );
        } else {
            tracing::warn!(
                "{} gateway not configured; {} notifications will be simulated",
                channel,
                channel
            );
        }
    }

    Ok(gateways)
}

/// Spawn background workers:
/// - periodic reminder scan (all reminder kinds)
///
/// Returns the `JoinHandle`s so callers can await task shutdown. Each worker
/// listens for a shutdown notification via a `tokio::sync::broadcast::Sender<()>`.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if !state.config.reminders.enabled {
        tracing::info!("Reminder scan worker disabled");
        return handles;
    }

    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        let interval =
            std::time::Duration::from_secs(state.config.reminders.scan_interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            loop {
                tracing::debug!("Starting periodic reminder scan");

                for result in state.scanner.scan_all(chrono::Utc::now()).await {
                    match result {
                        Ok(summary) if summary.failed > 0 => {
                            tracing::warn!(
                                "{} reminder scan had {} failure(s): {:?}",
                                summary.kind,
                                summary.failed,
                                summary.errors
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Reminder scan failed: {:?}", e),
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Reminder scan worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    handles
}
