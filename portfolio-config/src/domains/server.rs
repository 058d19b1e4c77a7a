//! Listener configuration

use crate::error::ConfigResult;
use crate::validation::{validate_port_range, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrently served client sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl ServerConfig {
    /// `address:port` string suitable for binding
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.bind_address, "bind_address", self.domain_name())?;
        validate_port_range(self.port, "port", self.domain_name())?;
        validate_positive(self.max_sessions, "max_sessions", self.domain_name())?;

        if self.bind_address.parse::<std::net::IpAddr>().is_err()
            && self.bind_address != "localhost"
        {
            return Err(self.validation_error(format!(
                "bind_address must be an IP address or 'localhost', got '{}'",
                self.bind_address
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "server"
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1313
}

fn default_max_sessions() -> usize {
    64
}
