//! Configuration loading and environment variable handling

use crate::domains::PortfolioConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "PORTFOLIO".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML (or `.json`) file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<PortfolioConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: PortfolioConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<PortfolioConfig> {
        let mut config = PortfolioConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<PortfolioConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut PortfolioConfig) -> ConfigResult<()> {
        self.apply_server_overrides(&mut config.server)?;
        self.apply_dispatch_overrides(&mut config.dispatch)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply server config overrides
    fn apply_server_overrides(
        &self,
        config: &mut crate::domains::server::ServerConfig,
    ) -> ConfigResult<()> {
        if let Ok(bind) = self.get_env_var("SERVER_BIND_ADDRESS") {
            config.bind_address = bind;
        }

        if let Ok(port) = self.get_env_var("SERVER_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid SERVER_PORT: {}", e)))?;
        }

        if let Ok(max_sessions) = self.get_env_var("MAX_SESSIONS") {
            config.max_sessions = max_sessions
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_SESSIONS: {}", e)))?;
        }

        Ok(())
    }

    /// Apply dispatch config overrides
    fn apply_dispatch_overrides(
        &self,
        config: &mut crate::domains::dispatch::DispatchConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("COMMAND_TIMEOUT_SECONDS") {
            let seconds: u64 = timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid COMMAND_TIMEOUT_SECONDS: {}", e))
            })?;
            // Zero disables the deadline
            config.command_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Ok(interval) = self.get_env_var("RACE_POLL_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid RACE_POLL_INTERVAL_MS: {}", e))
            })?;
            config.race_poll_interval = Duration::from_millis(millis);
        }

        if let Ok(command) = self.get_env_var("RACE_COMMAND") {
            config.race_command = command;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
