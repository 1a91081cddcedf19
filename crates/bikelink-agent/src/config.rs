use std::path::{Path, PathBuf};

use bikelink_core::LinkConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "BIKELINK_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl From<bikelink_core::config::ConfigError> for ConfigError {
    fn from(err: bikelink_core::config::ConfigError) -> Self {
        match err {
            bikelink_core::config::ConfigError::ValidationError(msg) => {
                ConfigError::ValidationError(format!("link: {msg}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding the identity, server key and pairing table.
    pub storage_dir: PathBuf,

    // Logging
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,

    // Dispatcher
    pub queue_depth: usize,
    pub timer_interval_ms: u64,

    pub link: LinkConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/var/lib/bikelink"),
            log_level: None,
            log_file: None,
            queue_depth: 32,
            timer_interval_ms: 1_000,
            link: LinkConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse a TOML file, overlay the environment and validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {e}", path.display())))?;

        let mut config = Self::from_toml(&content)?;
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `BIKELINK_*` variables. Unknown names are ignored, unparsable
    /// values are an error.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "STORAGE_DIR" => self.storage_dir = PathBuf::from(value),
                "LOG_LEVEL" => self.log_level = Some(value),
                "LOG_FILE" => self.log_file = Some(PathBuf::from(value)),
                "QUEUE_DEPTH" => self.queue_depth = parse(&name, &value)?,
                "TIMER_INTERVAL_MS" => self.timer_interval_ms = parse(&name, &value)?,
                "MAX_PAIRED_PHONES" => self.link.max_paired_phones = parse(&name, &value)?,
                "ENFORCE_VALIDITY_WINDOW" => {
                    self.link.enforce_validity_window = parse(&name, &value)?
                }
                "ALLOW_SESSION_RESUME" => self.link.allow_session_resume = parse(&name, &value)?,
                "MAX_COMMAND_LEN" => self.link.max_command_len = parse(&name, &value)?,
                "PAIRING_TIMEOUT_SECS" => {
                    self.link.pairing_timeout_secs = match value.as_str() {
                        "" | "off" | "none" => None,
                        other => Some(parse(&name, other)?),
                    }
                }
                _ => {
                    debug!(variable = %name, "ignoring unknown override");
                    continue;
                }
            }
            debug!(variable = %name, "applied environment override");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage_dir must not be empty".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.timer_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timer_interval_ms must be at least 1".to_string(),
            ));
        }
        self.link.validate()?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{name}: invalid value {value:?}")))
}
