//! Configuration management for the Convoy control plane
//!
//! Values are layered, lowest precedence first: `conf/convoy.yml` (or the
//! file named by `--config`), `CONVOY__*` environment variables, then the
//! command line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};

use convoy_mesh::BuilderConfig;

use crate::logging::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/convoy.yml";
pub const DEFAULT_ZONE: &str = "default";
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ZONE_PROPERTY: &str = "convoy.zone";
pub const RESOURCES_PROPERTY: &str = "convoy.resources";
pub const RECONCILE_INTERVAL_PROPERTY: &str = "convoy.reconcile.interval_ms";
pub const LOG_LEVEL_PROPERTY: &str = "convoy.log.level";
pub const LOG_DIR_PROPERTY: &str = "convoy.log.dir";
pub const MADS_ENABLED_PROPERTY: &str = "convoy.mads.enabled";

/// Command line arguments for the control plane
#[derive(Debug, Default, Parser)]
#[command(name = "convoy-cp", about = "Convoy mesh control plane")]
pub struct Cli {
    /// Configuration file, `conf/convoy.yml` when omitted
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Name of the zone this control plane serves
    #[arg(short = 'z', long = "zone")]
    pub zone: Option<String>,
    /// YAML file holding the mesh resources
    #[arg(short = 'r', long = "resources", env = "CONVOY_RESOURCES")]
    pub resources: Option<PathBuf>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// `CONVOY__RECONCILE__INTERVAL_MS` maps to `convoy.reconcile.interval_ms`
pub fn environment() -> Environment {
    Environment::with_prefix("convoy")
        .prefix_separator("__")
        .separator("__")
        .keep_prefix(true)
        .try_parsing(true)
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::load(&Cli::parse(), environment())
    }

    pub fn load(args: &Cli, env: Environment) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(env);

        if let Some(zone) = &args.zone {
            builder = builder.set_override(ZONE_PROPERTY, zone.as_str())?;
        }
        if let Some(resources) = &args.resources {
            builder = builder.set_override(RESOURCES_PROPERTY, resources.to_string_lossy().as_ref())?;
        }
        if let Some(level) = &args.log_level {
            builder = builder.set_override(LOG_LEVEL_PROPERTY, level.as_str())?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    pub fn zone(&self) -> String {
        self.config
            .get_string(ZONE_PROPERTY)
            .unwrap_or(DEFAULT_ZONE.to_string())
    }

    pub fn resources_path(&self) -> Option<PathBuf> {
        self.config
            .get_string(RESOURCES_PROPERTY)
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    pub fn reconcile_interval(&self) -> Duration {
        let millis = self
            .config
            .get_int(RECONCILE_INTERVAL_PROPERTY)
            .ok()
            .filter(|ms| *ms > 0)
            .map(|ms| ms as u64)
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_MS);
        Duration::from_millis(millis)
    }

    pub fn mads_enabled(&self) -> bool {
        self.config.get_bool(MADS_ENABLED_PROPERTY).unwrap_or(true)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOG_DIR_PROPERTY).ok(),
            self.config
                .get_string(LOG_LEVEL_PROPERTY)
                .unwrap_or(DEFAULT_LOG_LEVEL.to_string()),
        )
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            zone: self.zone(),
            ..Default::default()
        }
    }
}
