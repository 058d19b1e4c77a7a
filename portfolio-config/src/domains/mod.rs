//! Domain-specific configuration modules

pub mod backends;
pub mod dispatch;
pub mod logging;
pub mod server;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main portfolio configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: server::ServerConfig,

    /// Command relay configuration
    #[serde(default)]
    pub dispatch: dispatch::DispatchConfig,

    /// Selectable backends, in catalogue order
    #[serde(default = "backends::default_backends")]
    pub backends: Vec<backends::BackendConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            server: server::ServerConfig::default(),
            dispatch: dispatch::DispatchConfig::default(),
            backends: backends::default_backends(),
            logging: logging::LoggingConfig::default(),
        }
    }
}

impl PortfolioConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.dispatch.validate()?;
        backends::validate_catalogue(&self.backends)?;
        self.logging.validate()?;
        Ok(())
    }

    /// Find a catalogue entry by the id a client sends
    pub fn backend(&self, id: u32) -> Option<&backends::BackendConfig> {
        self.backends.iter().find(|backend| backend.id == id)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = PortfolioConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
