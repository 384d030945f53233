//! Configuration management

use clap::Parser;
use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid reconcile configuration: {0}")]
    InvalidReconcile(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::HubError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::HubError::ConfigError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub plugins: PluginConfig,
    pub database: DatabaseConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    ///
    /// Returns the parsed CLI arguments too, since the host binary acts on
    /// `--install` and `--remove`.
    pub fn load() -> Result<(Self, CliArgs), ConfigError> {
        let cli_args = CliArgs::parse();
        let config = Self::from_args(&cli_args)?;
        Ok((config, cli_args))
    }

    /// Build configuration from already parsed CLI arguments
    pub fn from_args(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: FICTION_HUB__RECONCILE__MAX_CONCURRENCY=16
        builder = builder.add_source(
            Environment::with_prefix("FICTION_HUB")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(plugin_dir) = &cli_args.plugin_dir {
            builder = builder.set_override("plugins.plugin_dir", plugin_dir.display().to_string())?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plugins.validate()?;
        self.database.validate()?;
        self.reconcile.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("plugins.plugin_dir", "./providers")?
        .set_default("plugins.reclaim_retries", 10)?
        .set_default("plugins.reclaim_interval_ms", 100)?
        .set_default("database.path", "./data/fiction-hub.db")?
        .set_default("database.connection_pool_size", 4)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("reconcile.max_concurrency", 8)?
        .set_default("reconcile.provider_timeout_secs", 15)?
        .set_default("reconcile.match_cache_ttl_secs", 6 * 3600)?
        .set_default("reconcile.match_cache_sliding_secs", 3600)?
        .set_default("reconcile.listing_cache_ttl_secs", 600)?
        .set_default("reconcile.listing_cache_sliding_secs", 300)?
        .set_default("reconcile.cache_max_entries", 2048)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.rotation", "daily")?
        .set_default("logging.max_backups", 7)?)
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "fiction-hub")]
#[command(about = "Serialized fiction provider host", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Provider directory path
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Install a provider package at startup (repeatable)
    #[arg(long, value_name = "PACKAGE")]
    pub install: Vec<PathBuf>,

    /// Remove an installed provider at startup (repeatable)
    #[arg(long, value_name = "NAME")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub plugin_dir: PathBuf,
    /// How many times `remove` polls for module reclamation before deleting files
    pub reclaim_retries: u32,
    pub reclaim_interval_ms: u64,
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPlugin("plugin_dir cannot be empty".to_string()));
        }

        if self.reclaim_interval_ms == 0 {
            return Err(ConfigError::InvalidPlugin(
                "reclaim_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase("busy_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub max_concurrency: usize,
    pub provider_timeout_secs: u64,
    pub match_cache_ttl_secs: u64,
    pub match_cache_sliding_secs: u64,
    pub listing_cache_ttl_secs: u64,
    pub listing_cache_sliding_secs: u64,
    pub cache_max_entries: usize,
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidReconcile(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::InvalidReconcile(
                "provider_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.match_cache_sliding_secs > self.match_cache_ttl_secs
            || self.listing_cache_sliding_secs > self.listing_cache_ttl_secs
        {
            return Err(ConfigError::InvalidReconcile(
                "sliding windows cannot exceed their absolute ttl".to_string(),
            ));
        }

        if self.cache_max_entries == 0 {
            return Err(ConfigError::InvalidReconcile(
                "cache_max_entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            provider_timeout_secs: 15,
            match_cache_ttl_secs: 6 * 3600,
            match_cache_sliding_secs: 3600,
            listing_cache_ttl_secs: 600,
            listing_cache_sliding_secs: 300,
            cache_max_entries: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub rotation: String,
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}
