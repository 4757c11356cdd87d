//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parlor_shared::constants::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_HTTP_PORT, DEFAULT_KEEPALIVE_SECS, DEFAULT_MAX_BODY_BYTES,
    DEFAULT_QUEUE_CAPACITY,
};
use parlor_store::HistoryWindow;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file holding the message log and groups.
    /// Env: `DATABASE_PATH`
    /// Default: `./chat.db`
    pub database_path: PathBuf,

    /// Pending payloads per delivery session before new ones are dropped.
    /// Env: `QUEUE_CAPACITY` (minimum 1)
    /// Default: `100`
    pub queue_capacity: usize,

    /// Ceiling on messages returned by one history query.
    /// Env: `HISTORY_LIMIT` (minimum 1)
    /// Default: `100`
    pub history_limit: u32,

    /// Which end of a long conversation history queries return.
    /// Env: `HISTORY_WINDOW` (`latest` / `oldest`)
    /// Default: `latest`
    pub history_window: HistoryWindow,

    /// Interval between SSE keep-alive comments; `None` disables them.
    /// Env: `KEEPALIVE_SECS` (`0` disables)
    /// Default: `15`
    pub keepalive: Option<Duration>,

    /// Maximum request body size in bytes.
    /// Env: `MAX_BODY_BYTES`
    /// Default: `65536`
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./chat.db"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_window: HistoryWindow::Latest,
            keepalive: Some(Duration::from_secs(DEFAULT_KEEPALIVE_SECS)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values are
    /// logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("QUEUE_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.queue_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid QUEUE_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("HISTORY_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.history_limit = n,
                _ => tracing::warn!(value = %val, "Invalid HISTORY_LIMIT, using default"),
            }
        }

        if let Some(val) = lookup("HISTORY_WINDOW") {
            match val.parse::<HistoryWindow>() {
                Ok(window) => config.history_window = window,
                Err(e) => tracing::warn!(error = %e, "Invalid HISTORY_WINDOW, using default"),
            }
        }

        if let Some(val) = lookup("KEEPALIVE_SECS") {
            match val.parse::<u64>() {
                Ok(0) => config.keepalive = None,
                Ok(secs) => config.keepalive = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(value = %val, "Invalid KEEPALIVE_SECS, using default"),
            }
        }

        if let Some(val) = lookup("MAX_BODY_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_BYTES, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
