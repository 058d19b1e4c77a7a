//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use portfolio_config::BackendKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as worker process (internal use)
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Backend the worker adapts (used with --worker)
    #[arg(long, value_name = "KIND", hide = true, requires = "worker")]
    pub backend: Option<BackendKind>,

    /// Solver program replacing the backend's default command
    #[arg(long, value_name = "PROGRAM", hide = true, requires = "worker")]
    pub solver: Option<String>,

    /// Argument passed to the --solver program, repeatable
    #[arg(
        long,
        value_name = "ARG",
        hide = true,
        requires = "solver",
        allow_hyphen_values = true
    )]
    pub solver_arg: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Solver command line given with `--solver`/`--solver-arg`
    pub fn solver_command(&self) -> Option<Vec<String>> {
        self.solver.as_ref().map(|program| {
            std::iter::once(program.clone())
                .chain(self.solver_arg.iter().cloned())
                .collect()
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the portfolio server (default)
    Serve {
        /// Address to bind, overriding the configuration
        #[arg(long, value_name = "ADDRESS")]
        bind: Option<String>,

        /// Port to listen on, overriding the configuration
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Path to configuration file (optional, uses default loading logic)
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}
