//! # hub-server
//!
//! Real-time notification and chat hub for the agency platform.
//!
//! This binary provides:
//! - **WebSocket gateway** with per-user rooms, presence and multi-device
//!   fan-out
//! - **Chat relay** for direct and group conversations, including media
//!   attachments stored under `uploads/`
//! - **Notification translator** turning domain events from the CRUD
//!   services into per-recipient notifications with a live unread counter
//! - **Scheduled sweeps** for overdue invoices and tasks, due-today
//!   reminders and expired trials
//! - **REST API** (axum) for notification history, read state, chat history,
//!   event ingress and entity sync from the CRUD services

mod api;
mod auth;
mod chat;
mod config;
mod error;
mod events;
mod gateway;
mod mailer;
mod media_store;
mod notify;
mod presence;
mod rooms;
mod sweep;
mod sync;
mod throttle;
mod translator;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hub_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::sweep::{SweepKind, SweepRunner};

/// Shared handle to the store. Held only for the duration of a query batch.
pub(crate) type Db = Arc<Mutex<Database>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hub_server=debug,hub_store=info")),
        )
        .init();

    info!("Starting {} v{}", hub_shared::constants::APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        uploads = %config.uploads_path.display(),
        max_media_size = config.max_media_size,
        presence_on_close = config.presence_on_close,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the store and wire subsystems
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db: Db = Arc::new(Mutex::new(database));

    let http_addr = config.http_addr;
    let sweep_interval = config.sweep_interval;
    let due_alert_interval = config.due_alert_interval;
    let due_alert_at = config.due_alert_at;

    let mailer: Arc<dyn Mailer> = match &config.smtp_url {
        Some(url) => match SmtpMailer::new(url, &config.smtp_from) {
            Ok(smtp) => {
                info!(from = %config.smtp_from, "Emails go through SMTP");
                Arc::new(smtp)
            }
            Err(e) => {
                warn!(error = %e, "SMTP_URL unusable, emails will only be logged");
                Arc::new(LogMailer)
            }
        },
        None => Arc::new(LogMailer),
    };

    let state = AppState::new(config, db.clone(), mailer).await?;
    if !state.credentials.enabled() {
        warn!("INTERNAL_TOKEN not set, authentication is disabled");
    }

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let runner = Arc::new(SweepRunner::new(db, state.translator.clone()));
    for kind in SweepKind::ALL {
        match (kind, due_alert_at) {
            (SweepKind::TaskDueToday, Some(at)) => {
                runner.spawn_daily(kind, at);
            }
            (SweepKind::TaskDueToday, None) => {
                runner.spawn_schedule(kind, due_alert_interval);
            }
            _ => {
                runner.spawn_schedule(kind, sweep_interval);
            }
        }
    }

    // Evict throttle buckets idle for more than 10 minutes
    let throttle = state.throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            throttle.purge_stale(Duration::from_secs(600));
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
