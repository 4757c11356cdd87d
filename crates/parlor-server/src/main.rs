//! # parlor-server
//!
//! Real-time chat fan-out server.
//!
//! This binary provides:
//! - **Server-sent event streams** that push messages and typing indicators
//!   to every connected user
//! - **Durable message log** (SQLite) with per-conversation history
//! - **Group membership** resolved at send time for group fan-out
//! - **REST API** (axum) for sending, typing, history and group management

mod api;
mod config;
mod db;
mod error;
mod membership;
mod message_log;
mod registry;
mod router;
mod session;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor_server=debug")),
        )
        .init();

    info!("Starting Parlor chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the message log
    // -----------------------------------------------------------------------
    let database = parlor_store::Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Message log ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(database, config);

    // -----------------------------------------------------------------------
    // 4. Periodic delivery stats
    // -----------------------------------------------------------------------
    let stats_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            let online = stats_state.router.registry().online_count().await;
            let stats = stats_state.router.stats();
            info!(
                online,
                sent = stats.sent,
                delivered = stats.delivered,
                dropped = stats.dropped,
                offline = stats.offline,
                "Delivery stats"
            );
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
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
