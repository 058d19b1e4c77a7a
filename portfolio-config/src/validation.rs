//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that a string is a single protocol token (no whitespace)
pub fn validate_token(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(value, field_name, domain)?;
    if value.chars().any(char::is_whitespace) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot contain whitespace, got '{}'", field_name, value),
        });
    }
    Ok(())
}

/// Validate a port number
pub fn validate_port_range(port: u16, field_name: &str, domain: &str) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be 0", field_name),
        });
    }

    // Port 1-1023 are typically reserved for system services
    if port <= 1023 {
        log::warn!("{} port {} is in the reserved range (1-1023)", field_name, port);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("z3", "name", "backends").is_ok());
        assert!(validate_required_string("", "name", "backends").is_err());
        assert!(validate_required_string("  ", "name", "backends").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "max_sessions", "server").is_ok());
        assert!(validate_positive(0usize, "max_sessions", "server").is_err());
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("solve", "race_command", "dispatch").is_ok());
        assert!(validate_token("check sat", "race_command", "dispatch").is_err());
    }

    #[test]
    fn test_validate_port_range() {
        assert!(validate_port_range(1313, "port", "server").is_ok());
        assert!(validate_port_range(0, "port", "server").is_err());
    }
}
