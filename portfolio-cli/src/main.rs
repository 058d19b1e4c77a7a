use anyhow::{Context, Result};
use clap::Parser;
use portfolio_config::{ConfigLoader, PortfolioConfig};
use portfolio_dispatch::{run_worker, Catalogue, Listener};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info};

mod cli;
mod logging;

use cli::{Cli, Commands, ConfigCommands};
use logging::{init_logging, init_worker_tracing};

/// Load configuration from file or use defaults.
///
/// Runs before the subscriber is installed, so problems go straight to stderr.
fn load_config(config_path: Option<&PathBuf>) -> Result<PortfolioConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) if path.exists() => loader
            .from_file(path)
            .context(format!("Failed to load configuration from {:?}", path)),
        Some(path) => {
            eprintln!("Configuration file not found: {:?}. Using defaults.", path);
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Report where the configuration came from once logging is up
fn log_config_source(config_path: Option<&PathBuf>) {
    match config_path {
        Some(path) if path.exists() => info!("Loaded configuration from: {:?}", path),
        Some(path) => debug!("Using defaults in place of missing {:?}", path),
        None => debug!("No configuration file specified. Loaded from environment or defaults."),
    }
}

/// Run the worker side of one backend and return the process exit code
async fn worker_command(cli: &Cli) -> i32 {
    if let Err(e) = init_worker_tracing(cli.log_level.as_ref()) {
        eprintln!("{:#}", e);
    }

    let Some(kind) = cli.backend else {
        error!("Worker mode requires --backend");
        return 2;
    };

    match run_worker(kind, cli.solver_command()).await {
        Ok(()) => {
            debug!("Worker for {} finished", kind);
            0
        }
        Err(e) => {
            error!("Worker for {} failed: {}", kind, e);
            1
        }
    }
}

/// Start the portfolio server
async fn serve_command(
    mut config: PortfolioConfig,
    bind: Option<&String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config
        .validate_all()
        .context("Invalid server configuration")?;

    let worker_exe =
        std::env::current_exe().context("Failed to locate the portfolio executable")?;
    let catalogue = Catalogue::new(&config.backends, &worker_exe);

    let address = config.server.listen_address();
    let listener = Listener::bind(
        address.as_str(),
        catalogue,
        config.dispatch.clone(),
        config.server.max_sessions,
    )
    .await
    .context(format!("Failed to bind {}", address))?;

    listener
        .serve(shutdown_signal())
        .await
        .context("Listener failed")?;

    info!("Portfolio server stopped");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match load_config(Some(config_file)) {
        Ok(config) => {
            println!("✅ Configuration file is valid");
            println!("   Backends: {}", Catalogue::new(&config.backends, "").line());
            info!("Configuration validation passed");
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {:#}", e);
            error!("Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: &PathBuf, force: bool) -> Result<()> {
    info!("Generating configuration at: {:?}", output);

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, PortfolioConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("✅ Configuration generated at: {:?}", output);
    println!(
        "🔧 Validate with: portfolio config validate --config-file {:?}",
        output
    );

    Ok(())
}

/// Handle configuration display
fn handle_config_show(
    config_file: Option<&PathBuf>,
    loaded: PortfolioConfig,
    format: &str,
) -> Result<()> {
    info!("Showing configuration (format: {})", format);

    let config = match config_file {
        Some(path) => load_config(Some(path))?,
        None => loaded,
    };

    match format.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let yaml_output =
                serde_yaml::to_string(&config).context("Failed to serialize to YAML")?;
            println!("{}", yaml_output);
        }
        "json" => {
            let json_output =
                serde_json::to_string_pretty(&config).context("Failed to serialize to JSON")?;
            println!("{}", json_output);
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle worker mode first, its stdout belongs to the dispatcher
    if cli.worker {
        let code = worker_command(&cli).await;
        // The blocking stdin reader would keep the runtime from shutting down
        std::process::exit(code);
    }

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging, cli.log_level.as_ref())?;
    log_config_source(cli.config.as_ref());

    match &cli.command {
        None => serve_command(config, None, None).await,
        Some(Commands::Serve { bind, port }) => {
            info!("Starting portfolio server");
            serve_command(config, bind.as_ref(), *port).await
        }
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(output, *force),
            ConfigCommands::Show {
                config_file,
                format,
            } => handle_config_show(config_file.as_ref(), config, format),
        },
    }
}
