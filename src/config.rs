//! Join engine settings.
//!
//! A [`JoinConfig`] can be built directly, parsed from JSON with
//! durations in milliseconds, or read from `JOINER_*` environment
//! variables:
//!
//! ```text
//! JOINER_ENGINE_ID=partition-0
//! JOINER_FORWARD_WINDOW_MS=600000
//! JOINER_BACKWARD_WINDOW_MS=5000
//! JOINER_PUNCTUATION_TIMEOUT_MS=500
//! JOINER_PUNCTUATION_SLACK_MS=1000
//! JOINER_SLACK_MODE=additive
//! JOINER_MAX_RECEIVE_TIMEOUT_RETRIES=3
//! ```
//!
//! The slack mode has no default and must always be given.

use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::window::{SlackMode, WindowPolicy};

pub const DEFAULT_ENGINE_ID: &str = "joiner";
pub const DEFAULT_MAX_RECEIVE_TIMEOUT_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinConfig {
    /// Label attached to logs and metrics of this engine instance.
    pub engine_id: String,
    /// Maximum delay of an observation after its interaction.
    pub forward_window: Duration,
    /// Maximum lead of an observation before its interaction.
    pub backward_window: Duration,
    /// Timeout of a single receive on either source.
    pub punctuation_timeout: std::time::Duration,
    pub punctuation_slack: Duration,
    pub slack_mode: SlackMode,
    /// Extra receive attempts after a timeout before a source is
    /// considered idle for this cycle.
    pub max_receive_timeout_retries: u32,
}

/// On-disk form, durations in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJoinConfig {
    #[serde(default = "default_engine_id")]
    engine_id: String,
    forward_window_ms: i64,
    backward_window_ms: i64,
    punctuation_timeout_ms: u64,
    punctuation_slack_ms: i64,
    slack_mode: SlackMode,
    #[serde(default = "default_max_retries")]
    max_receive_timeout_retries: u32,
}

fn default_engine_id() -> String {
    DEFAULT_ENGINE_ID.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RECEIVE_TIMEOUT_RETRIES
}

fn millis(key: &'static str, ms: i64) -> Result<Duration, ConfigError> {
    Duration::try_milliseconds(ms).ok_or_else(|| ConfigError::Invalid {
        key,
        reason: format!("{ms}ms is out of range"),
    })
}

impl TryFrom<RawJoinConfig> for JoinConfig {
    type Error = ConfigError;

    fn try_from(raw: RawJoinConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            engine_id: raw.engine_id,
            forward_window: millis("forward_window_ms", raw.forward_window_ms)?,
            backward_window: millis("backward_window_ms", raw.backward_window_ms)?,
            punctuation_timeout: std::time::Duration::from_millis(raw.punctuation_timeout_ms),
            punctuation_slack: millis("punctuation_slack_ms", raw.punctuation_slack_ms)?,
            slack_mode: raw.slack_mode,
            max_receive_timeout_retries: raw.max_receive_timeout_retries,
        })
    }
}

impl JoinConfig {
    pub fn new(
        forward_window: Duration,
        backward_window: Duration,
        punctuation_timeout: std::time::Duration,
        punctuation_slack: Duration,
        slack_mode: SlackMode,
    ) -> Self {
        Self {
            engine_id: default_engine_id(),
            forward_window,
            backward_window,
            punctuation_timeout,
            punctuation_slack,
            slack_mode,
            max_receive_timeout_retries: DEFAULT_MAX_RECEIVE_TIMEOUT_RETRIES,
        }
    }

    pub fn with_engine_id(mut self, engine_id: impl Into<String>) -> Self {
        self.engine_id = engine_id.into();
        self
    }

    pub fn with_max_receive_timeout_retries(mut self, retries: u32) -> Self {
        self.max_receive_timeout_retries = retries;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawJoinConfig = serde_json::from_str(json)?;
        let config = Self::try_from(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Read settings from `JOINER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps an environment
    /// variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn required<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &'static str,
        ) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            let value = lookup(key).ok_or(ConfigError::Missing(key))?;
            value.parse().map_err(|err: T::Err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
            })
        }

        let window = |key: &'static str| -> Result<Duration, ConfigError> {
            millis(key, required(&lookup, key)?)
        };

        let max_receive_timeout_retries = match lookup("JOINER_MAX_RECEIVE_TIMEOUT_RETRIES") {
            Some(_) => required(&lookup, "JOINER_MAX_RECEIVE_TIMEOUT_RETRIES")?,
            None => DEFAULT_MAX_RECEIVE_TIMEOUT_RETRIES,
        };
        let config = Self {
            engine_id: lookup("JOINER_ENGINE_ID").unwrap_or_else(default_engine_id),
            forward_window: window("JOINER_FORWARD_WINDOW_MS")?,
            backward_window: window("JOINER_BACKWARD_WINDOW_MS")?,
            punctuation_timeout: std::time::Duration::from_millis(required(
                &lookup,
                "JOINER_PUNCTUATION_TIMEOUT_MS",
            )?),
            punctuation_slack: window("JOINER_PUNCTUATION_SLACK_MS")?,
            slack_mode: required(&lookup, "JOINER_SLACK_MODE")?,
            max_receive_timeout_retries,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_window <= Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "forward_window",
                reason: "must be positive".to_string(),
            });
        }
        if self.backward_window <= Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "backward_window",
                reason: "must be positive".to_string(),
            });
        }
        if self.punctuation_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "punctuation_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.punctuation_slack < Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "punctuation_slack",
                reason: "must not be negative".to_string(),
            });
        }
        // Additive punctuation moves by exactly the slack per timeout.
        if self.slack_mode == SlackMode::Additive && self.punctuation_slack == Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "punctuation_slack",
                reason: "must be positive in additive mode".to_string(),
            });
        }
        Ok(())
    }

    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy::new(
            self.forward_window,
            self.backward_window,
            self.punctuation_slack,
            self.slack_mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_json_with_defaults() {
        let config = JoinConfig::from_json_str(
            r#"{
                "forward_window_ms": 600000,
                "backward_window_ms": 5000,
                "punctuation_timeout_ms": 500,
                "punctuation_slack_ms": 1000,
                "slack_mode": "additive"
            }"#,
        )
        .unwrap();
        assert_eq!(config.engine_id, DEFAULT_ENGINE_ID);
        assert_eq!(config.forward_window, Duration::minutes(10));
        assert_eq!(config.backward_window, Duration::seconds(5));
        assert_eq!(
            config.punctuation_timeout,
            std::time::Duration::from_millis(500)
        );
        assert_eq!(config.slack_mode, SlackMode::Additive);
        assert_eq!(
            config.max_receive_timeout_retries,
            DEFAULT_MAX_RECEIVE_TIMEOUT_RETRIES
        );
    }

    #[test]
    fn json_requires_slack_mode() {
        let err = JoinConfig::from_json_str(
            r#"{
                "forward_window_ms": 600000,
                "backward_window_ms": 5000,
                "punctuation_timeout_ms": 500,
                "punctuation_slack_ms": 1000
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_empty_windows() {
        let err = JoinConfig::from_json_str(
            r#"{
                "forward_window_ms": 0,
                "backward_window_ms": 5000,
                "punctuation_timeout_ms": 500,
                "punctuation_slack_ms": 1000,
                "slack_mode": "subtractive"
            }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "forward_window",
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let err = JoinConfig::from_json_str(
            r#"{
                "forward_window_ms": -9223372036854775808,
                "backward_window_ms": 5000,
                "punctuation_timeout_ms": 500,
                "punctuation_slack_ms": 1000,
                "slack_mode": "subtractive"
            }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "forward_window_ms",
                ..
            }
        ));

        let vars = HashMap::from([
            ("JOINER_FORWARD_WINDOW_MS", "1000"),
            ("JOINER_BACKWARD_WINDOW_MS", "-9223372036854775808"),
            ("JOINER_PUNCTUATION_TIMEOUT_MS", "50"),
            ("JOINER_PUNCTUATION_SLACK_MS", "10"),
            ("JOINER_SLACK_MODE", "subtractive"),
        ]);
        let err = JoinConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "JOINER_BACKWARD_WINDOW_MS",
                ..
            }
        ));
    }

    #[test]
    fn additive_needs_slack() {
        let config = JoinConfig::new(
            Duration::seconds(10),
            Duration::seconds(4),
            std::time::Duration::from_millis(5),
            Duration::zero(),
            SlackMode::Additive,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "punctuation_slack",
                ..
            })
        ));
        let config = JoinConfig {
            slack_mode: SlackMode::Subtractive,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_env_lookup() {
        let vars = HashMap::from([
            ("JOINER_ENGINE_ID", "p3"),
            ("JOINER_FORWARD_WINDOW_MS", "1000"),
            ("JOINER_BACKWARD_WINDOW_MS", "200"),
            ("JOINER_PUNCTUATION_TIMEOUT_MS", "50"),
            ("JOINER_PUNCTUATION_SLACK_MS", "10"),
            ("JOINER_SLACK_MODE", "Subtractive"),
            ("JOINER_MAX_RECEIVE_TIMEOUT_RETRIES", "0"),
        ]);
        let config =
            JoinConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.engine_id, "p3");
        assert_eq!(config.slack_mode, SlackMode::Subtractive);
        assert_eq!(config.max_receive_timeout_retries, 0);
        assert_eq!(config.window_policy().backward(), Duration::milliseconds(200));
    }

    #[test]
    fn env_lookup_reports_missing_and_invalid() {
        let vars = HashMap::from([
            ("JOINER_FORWARD_WINDOW_MS", "1000"),
            ("JOINER_BACKWARD_WINDOW_MS", "200"),
            ("JOINER_PUNCTUATION_TIMEOUT_MS", "50"),
            ("JOINER_PUNCTUATION_SLACK_MS", "10"),
        ]);
        let err = JoinConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JOINER_SLACK_MODE")));

        let mut vars = vars;
        vars.insert("JOINER_SLACK_MODE", "sometimes");
        let err = JoinConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "JOINER_SLACK_MODE",
                ..
            }
        ));
    }
}
