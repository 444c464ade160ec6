#![forbid(unsafe_code)]

//! Tunables of a history session.
//!
//! Defaults reproduce the builder's stock behaviour. A host can override any
//! subset from JSON, or from TOML with the `config-toml` feature:
//!
//! ```toml
//! max_history = 50
//! throttle_window_ms = 1500
//! failed_recovery = "drop"
//! ```
//!
//! ```
//! use uscore_history::HistoryConfig;
//!
//! let config = HistoryConfig::from_json_str(r#"{"max_history": 20}"#).unwrap();
//! assert_eq!(config.max_history, 20);
//! assert_eq!(config.drain_delay_ms, 100);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use web_time::Duration;

/// What happens to a record whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedRecoveryPolicy {
    /// Push the record back onto the stack it came from, so the user can
    /// retry once the document is in a state that accepts it.
    #[default]
    Restore,
    /// Discard the record.
    Drop,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Upper bound on each of the undo and redo stacks.
    pub max_history: usize,
    /// Throttled commits fire once per window of this length.
    pub throttle_window_ms: u64,
    /// Quiet period after the last undo/redo request before tasks drain.
    pub drain_delay_ms: u64,
    /// Delay between taking a task and applying it, giving the host a tick
    /// to render the busy state.
    pub apply_delay_ms: u64,
    /// CSS class marking a preview that is still loading. Such previews are
    /// never recorded.
    pub loading_marker: String,
    /// Fate of records whose replay failed.
    pub failed_recovery: FailedRecoveryPolicy,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            throttle_window_ms: 2000,
            drain_delay_ms: 100,
            apply_delay_ms: 1,
            loading_marker: "g-preloader".into(),
            failed_recovery: FailedRecoveryPolicy::Restore,
        }
    }
}

impl HistoryConfig {
    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Check every parameter. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_history == 0 {
            errors.push("max_history must be > 0".into());
        }
        if self.drain_delay_ms == 0 {
            errors.push("drain_delay_ms must be > 0".into());
        }
        if self.loading_marker.trim().is_empty() {
            errors.push("loading_marker must not be empty".into());
        }
        if self.apply_delay_ms > self.drain_delay_ms {
            errors.push(format!(
                "apply_delay_ms ({}) must not exceed drain_delay_ms ({})",
                self.apply_delay_ms, self.drain_delay_ms
            ));
        }
        errors
    }

    /// `self` if it validates, otherwise every problem found.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Throttle window as a duration.
    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    /// Drain debounce as a duration.
    #[must_use]
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    /// Apply tick as a duration.
    #[must_use]
    pub fn apply_delay(&self) -> Duration {
        Duration::from_millis(self.apply_delay_ms)
    }
}

/// Errors that can occur when loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// TOML parse error.
    #[cfg(feature = "config-toml")]
    Toml(toml::de::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            #[cfg(feature = "config-toml")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Validation(errors) => write!(f, "validation errors: {}", errors.join("; ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            #[cfg(feature = "config-toml")]
            Self::Toml(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
