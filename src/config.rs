use crate::core::{Result, SqlstepError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Journal modes accepted by `PRAGMA journal_mode`.
const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

/// Settings applied when a connection is opened.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Report extended result codes (e.g. 2067 for a unique violation)
    pub extended_result_codes: bool,
    pub busy_timeout_ms: Option<u64>,
    pub foreign_keys: Option<bool>,
    pub journal_mode: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            extended_result_codes: true,
            busy_timeout_ms: None,
            foreign_keys: None,
            journal_mode: None,
        }
    }
}

impl ConnectionConfig {
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects settings that would be spliced into a pragma unchecked.
    pub fn validate(&self) -> Result<()> {
        if let Some(mode) = &self.journal_mode {
            if !JOURNAL_MODES.iter().any(|m| m.eq_ignore_ascii_case(mode)) {
                return Err(SqlstepError::Config(format!(
                    "unknown journal_mode '{}', expected one of {}",
                    mode,
                    JOURNAL_MODES.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Logging-related configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error, off
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// `<config dir>/sqlstep/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sqlstep").join("config.toml"))
    }

    /// Loads the file at `default_path`, falling back to defaults when it
    /// does not exist. A file that exists but does not parse is an error.
    pub fn load_or_default() -> Result<Config> {
        match Self::default_path() {
            Some(path) if path.exists() => load_config(path),
            _ => Ok(Config::default()),
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// use sqlstep::config::load_config;
///
/// let config = load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| SqlstepError::Config(e.to_string()))?;
    config.connection.validate()?;
    Ok(config)
}
