//! Protocol policy knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default pairing table capacity.
pub const MAX_PAIRED_PHONE: usize = 8;

/// Default maximum plaintext length of a secure command.
pub const DEFAULT_MAX_COMMAND_LEN: usize = 512;

/// Default supervisory bound on pairing and session setup.
pub const DEFAULT_PAIRING_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Number of pairing slots; the count byte on disk limits this to 255.
    pub max_paired_phones: usize,
    /// Reject sessions outside the phone pairing key's validity window.
    pub enforce_validity_window: bool,
    /// Accept a session request on a fresh connection from an already paired phone.
    pub allow_session_resume: bool,
    /// `None` disables the supervisory timer.
    pub pairing_timeout_secs: Option<u64>,
    pub max_command_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_paired_phones: MAX_PAIRED_PHONE,
            enforce_validity_window: true,
            allow_session_resume: true,
            pairing_timeout_secs: Some(DEFAULT_PAIRING_TIMEOUT_SECS),
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
        }
    }
}

impl LinkConfig {
    pub fn pairing_timeout(&self) -> Option<Duration> {
        self.pairing_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_paired_phones == 0 || self.max_paired_phones > u8::MAX as usize {
            return Err(ConfigError::ValidationError(
                "max_paired_phones must be between 1 and 255".to_string(),
            ));
        }
        if self.max_command_len == 0 {
            return Err(ConfigError::ValidationError(
                "max_command_len must be at least 1".to_string(),
            ));
        }
        if self.pairing_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "pairing_timeout_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_paired_phones, 8);
        assert_eq!(config.pairing_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_table_size_bounds() {
        let mut config = LinkConfig::default();
        config.max_paired_phones = 0;
        assert!(config.validate().is_err());
        config.max_paired_phones = 256;
        assert!(config.validate().is_err());
        config.max_paired_phones = 255;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_command_len_rejected() {
        let config = LinkConfig {
            max_command_len: 0,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_can_be_disabled() {
        let config = LinkConfig {
            pairing_timeout_secs: None,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.pairing_timeout(), None);

        let zero = LinkConfig {
            pairing_timeout_secs: Some(0),
            ..LinkConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
