//! Backend catalogue configuration

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_required_string, validate_token, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Solving engine a worker process drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Z3,
    Cvc5,
    Boolector,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Z3 => "z3",
            BackendKind::Cvc5 => "cvc5",
            BackendKind::Boolector => "boolector",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "z3" => Ok(BackendKind::Z3),
            "cvc5" => Ok(BackendKind::Cvc5),
            "boolector" => Ok(BackendKind::Boolector),
            _ => Err(format!("Invalid backend kind: {}", s)),
        }
    }
}

/// One selectable catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Identifier the client sends to select this backend
    pub id: u32,

    /// Name shown in the catalogue line
    pub name: String,

    /// Engine driven by the built-in adapter
    pub kind: BackendKind,

    /// Launch this line-protocol program instead of the built-in adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments for `program`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Solver command line for the built-in adapter, replacing the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<Vec<String>>,
}

impl BackendConfig {
    /// Catalogue entry driven by the built-in adapter with the engine's default solver command
    pub fn builtin(id: u32, kind: BackendKind) -> Self {
        Self {
            id,
            name: kind.as_str().to_string(),
            kind,
            program: None,
            args: Vec::new(),
            solver: None,
        }
    }
}

impl Validatable for BackendConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_token(&self.name, "name", self.domain_name())?;

        if let Some(program) = &self.program {
            validate_required_string(program, "program", self.domain_name())?;
            if self.solver.is_some() {
                return Err(self.validation_error(format!(
                    "backend {} sets both program and solver",
                    self.id
                )));
            }
        } else if !self.args.is_empty() {
            return Err(self.validation_error(format!(
                "backend {} sets args without a program",
                self.id
            )));
        }

        if let Some(solver) = &self.solver {
            match solver.first() {
                Some(binary) => validate_required_string(binary, "solver", self.domain_name())?,
                None => {
                    return Err(self.validation_error(format!(
                        "backend {} has an empty solver command",
                        self.id
                    )))
                }
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "backends"
    }
}

/// Validate the catalogue as a whole
pub fn validate_catalogue(backends: &[BackendConfig]) -> ConfigResult<()> {
    if backends.is_empty() {
        return Err(ConfigError::DomainError {
            domain: "backends".to_string(),
            message: "At least one backend must be configured".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for backend in backends {
        backend.validate()?;
        if !seen.insert(backend.id) {
            return Err(ConfigError::DomainError {
                domain: "backends".to_string(),
                message: format!("Duplicate backend id {}", backend.id),
            });
        }
    }

    Ok(())
}

/// z3, cvc5 and boolector as entries 0, 1 and 2
pub fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig::builtin(0, BackendKind::Z3),
        BackendConfig::builtin(1, BackendKind::Cvc5),
        BackendConfig::builtin(2, BackendKind::Boolector),
    ]
}
