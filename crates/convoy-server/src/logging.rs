//! Logging initialisation
//!
//! Events always go to the console. When a log directory is configured they
//! are also written to rolling files:
//!
//! | Log File     | Content                               | Target Prefixes |
//! |--------------|---------------------------------------|-----------------|
//! | convoy.log   | Root logger (all components)          | (all)           |
//! | mesh.log     | Proxy builds and snapshot generation  | convoy_mesh     |
//!
//! `RUST_LOG` overrides the configured level of the console and root layers.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const ROOT_LOG_FILE: &str = "convoy.log";
pub const MESH_LOG_FILE: &str = "mesh.log";
const MESH_TARGET: &str = "convoy_mesh";

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Enables the file layers when set
    pub log_dir: Option<PathBuf>,
    pub level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Unknown level names fall back to `info`
    pub fn from_config(log_dir: Option<String>, level: String) -> Self {
        Self {
            log_dir: log_dir.filter(|dir| !dir.is_empty()).map(PathBuf::from),
            level: level.parse().unwrap_or(Level::INFO),
            ..Default::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_filter(config.env_filter());
    layers.push(Box::new(console_layer));

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;

        let root_appender = RollingFileAppender::new(config.rotation.into(), log_dir, ROOT_LOG_FILE);
        let (root_writer, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);
        let root_layer = fmt::layer()
            .with_writer(root_writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(config.env_filter());
        layers.push(Box::new(root_layer));

        let mesh_appender = RollingFileAppender::new(config.rotation.into(), log_dir, MESH_LOG_FILE);
        let (mesh_writer, mesh_guard) = tracing_appender::non_blocking(mesh_appender);
        guards.push(mesh_guard);
        let mesh_level: LevelFilter = config.level.into();
        let mesh_layer = fmt::layer()
            .with_writer(mesh_writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(Targets::new().with_target(MESH_TARGET, mesh_level));
        layers.push(Box::new(mesh_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if let Some(log_dir) = &config.log_dir {
        tracing::info!(log_dir = %log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.log_dir.is_none());
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_from_config() {
        let config = LoggingConfig::from_config(Some("/var/log/convoy".to_string()), "debug".to_string());
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/convoy")));
        assert_eq!(config.level, Level::DEBUG);

        let config = LoggingConfig::from_config(Some(String::new()), "loud".to_string());
        assert!(config.log_dir.is_none());
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert_eq!(Rotation::from(LogRotation::Daily), Rotation::DAILY);
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
    }
}
