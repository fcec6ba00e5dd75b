//! Call-control configuration

use crate::platform::ProviderConfiguration;
use crate::types::CallOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document could not be parsed
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Call-control configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallControlConfig {
    /// How long an answer from the native UI waits for the engine's incoming call
    pub admission_timeout_ms: u64,
    /// Name shown to remote parties
    pub default_display_name: Option<String>,
    /// Send video by default on platform-initiated calls
    pub default_video: bool,
    /// Provider configuration registered with the platform
    pub provider: ProviderConfiguration,
}

impl Default for CallControlConfig {
    fn default() -> Self {
        Self {
            admission_timeout_ms: 10_000,
            default_display_name: None,
            default_video: false,
            provider: ProviderConfiguration::default(),
        }
    }
}

impl CallControlConfig {
    /// Parse from a JSON document, filling gaps with defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or a value is out of range
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "admission_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        // The registry tracks one live call at a time.
        if self.provider.maximum_calls_per_call_group != 1 {
            return Err(ConfigError::InvalidValue {
                field: "provider.maximum_calls_per_call_group",
                reason: format!(
                    "only one call per group is supported, got {}",
                    self.provider.maximum_calls_per_call_group
                ),
            });
        }
        Ok(())
    }

    /// Admission timeout as a duration
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    /// Options used when the platform starts or answers a call on its own
    #[must_use]
    pub fn default_call_options(&self) -> CallOptions {
        CallOptions {
            video: self.default_video && self.provider.supports_video,
            display_name: self.default_display_name.clone(),
            ..CallOptions::audio_only()
        }
    }
}
