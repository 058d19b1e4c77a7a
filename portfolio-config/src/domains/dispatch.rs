//! Command dispatch configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_token, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How sessions relay commands to their workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for gathering answers or racing; `null` waits forever
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        default = "default_command_timeout"
    )]
    pub command_timeout: Option<Duration>,

    /// Time a worker gets to exit after SIGTERM before it is killed
    #[serde(
        rename = "termination_grace_ms",
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_termination_grace"
    )]
    pub termination_grace: Duration,

    /// Longest pause between two polling rounds of a race
    #[serde(
        rename = "race_poll_interval_ms",
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_race_poll_interval"
    )]
    pub race_poll_interval: Duration,

    /// Command that runs in race mode (exact, case-sensitive match)
    #[serde(default = "default_race_command")]
    pub race_command: String,

    /// Longest accepted line on any channel
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            termination_grace: default_termination_grace(),
            race_poll_interval: default_race_poll_interval(),
            race_command: default_race_command(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Validatable for DispatchConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(timeout) = self.command_timeout {
            validate_positive(timeout.as_millis(), "command_timeout", self.domain_name())?;
        }

        validate_positive(
            self.race_poll_interval.as_millis(),
            "race_poll_interval_ms",
            self.domain_name(),
        )?;

        validate_token(&self.race_command, "race_command", self.domain_name())?;
        if self.race_command == "exit" {
            return Err(self.validation_error("race_command cannot be 'exit'"));
        }

        validate_positive(self.max_frame_bytes, "max_frame_bytes", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "dispatch"
    }
}

// Default value functions
fn default_command_timeout() -> Option<Duration> {
    Some(Duration::from_secs(600))
}

fn default_termination_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_race_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_race_command() -> String {
    "solve".to_string()
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.command_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.termination_grace, Duration::from_secs(2));
        assert_eq!(config.race_poll_interval, Duration::from_millis(10));
        assert_eq!(config.race_command, "solve");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dispatch_config_validation() {
        let mut config = DispatchConfig::default();

        config.race_poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config = DispatchConfig::default();
        config.race_command = "exit".to_string();
        assert!(config.validate().is_err());

        config = DispatchConfig::default();
        config.race_command = String::new();
        assert!(config.validate().is_err());

        config = DispatchConfig::default();
        config.command_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        config.command_timeout = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sub_second_command_timeout_is_valid() {
        let config = DispatchConfig {
            command_timeout: Some(Duration::from_millis(300)),
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_ok());

        let yaml = "command_timeout: 0.5\n";
        let config: DispatchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.command_timeout, Some(Duration::from_millis(500)));
        assert!(config.validate().is_ok());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["command_timeout"], 0.5);

        assert!(serde_yaml::from_str::<DispatchConfig>("command_timeout: -1\n").is_err());
    }

    #[test]
    fn test_dispatch_config_field_names() {
        let yaml = "command_timeout: null\ntermination_grace_ms: 250\nrace_poll_interval_ms: 5\n";
        let config: DispatchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.termination_grace, Duration::from_millis(250));
        assert_eq!(config.race_poll_interval, Duration::from_millis(5));
        assert_eq!(config.race_command, "solve");
    }
}
