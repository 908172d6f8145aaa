//! Structured logging utilities for cbfs components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use cbfs_config::{log_server_info, log_notify_warn};
//!
//! log_server_info!("Client registered", client_id = "client-1");
//! log_notify_warn!("Delivery dropped", name = "notes.txt");
//! ```

use serde::{Deserialize, Serialize};

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SERVER: &'static str = "SERVER";
    pub const CLIENT: &'static str = "CLIENT";
    pub const NOTIFY: &'static str = "NOTIFY";
    pub const IPC: &'static str = "IPC";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === SERVER logging macros ===

#[macro_export]
macro_rules! log_server_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "SERVER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_server_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SERVER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_server_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "SERVER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_server_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SERVER", $($key = $value,)* $msg)
    };
}

// === CLIENT logging macros ===

#[macro_export]
macro_rules! log_client_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CLIENT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_client_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLIENT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_client_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLIENT", $($key = $value,)* $msg)
    };
}

// === NOTIFY logging macros ===

#[macro_export]
macro_rules! log_notify_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "NOTIFY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_notify_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "NOTIFY", $($key = $value,)* $msg)
    };
}

// === IPC logging macros ===

#[macro_export]
macro_rules! log_ipc_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "IPC", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup; `RUST_LOG` wins when set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
