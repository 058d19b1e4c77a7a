//! Domain-driven configuration for the solver portfolio
//!
//! Configuration is split by functional domain (server, dispatch, backend
//! catalogue, logging), each with serde defaults, validation and
//! environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    backends::{BackendConfig, BackendKind},
    dispatch::DispatchConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    server::ServerConfig,
    PortfolioConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration_millis, serde_duration_option};
