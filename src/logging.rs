//! Structured logging through `tracing`.
//!
//! Initialize once at startup:
//!
//! ```ignore
//! use topic_index::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! Field names used by the pipeline: `trial`, `stage`, `index`, `epoch`,
//! `document_id`, `batch_len`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
    /// Also append log lines to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty, file: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| LogError::InvalidLevel(level.to_string())),
    }
}

/// Install the global subscriber
/// A second call returns `LogError::AlreadyInitialized`
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let env_filter = build_filter(&config.level)?;

    let file = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Some(std::fs::OpenOptions::new().create(true).append(true).open(path)?)
        }
        None => None,
    };

    match config.format {
        LogFormat::Pretty => {
            let file_layer = file.map(|f| tfmt::layer().with_writer(f).with_target(true).with_ansi(false));
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(tfmt::layer().with_writer(io::stderr).with_target(true))
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let file_layer = file.map(|f| {
                tfmt::layer()
                    .json()
                    .with_writer(f)
                    .with_timer(SystemTime)
                    .with_current_span(true)
                    .flatten_event(true)
            });
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tfmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_timer(SystemTime)
                        .with_target(true)
                        .with_current_span(true)
                        .flatten_event(true),
                )
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);
    tracing::info!(log_level = %config.level, log_format = %config.format, log_file = ?config.file, "logging initialized");
    Ok(())
}

pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
