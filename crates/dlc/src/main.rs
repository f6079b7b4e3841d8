//! DLC bundle manager - command line entry point

use anyhow::{Context, Result};
use clap::Parser;
use config::{ConfigLoader, LoggingConfig};
use std::{env, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;

use app::Application;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_result = dotenv::dotenv();
    let cli = Cli::parse();

    // Needs no configuration or database
    if let Command::ExampleConfig { path } = &cli.command {
        ConfigLoader::create_example(path).context("Failed to write example configuration")?;
        println!("{}", serde_json::json!({ "written": path }));
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .or_else(|| env::var("CONFIG_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config = ConfigLoader::load(&config_path).context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    match dotenv_result {
        Ok(path) => info!("Loaded environment variables from {}", path.display()),
        Err(e) if !e.not_found() => warn!("Could not load .env file: {}", e),
        Err(_) => {}
    }
    info!("Configuration loaded from: {}", config_path.display());

    let app = Application::new(config)
        .await
        .context("Failed to create application")?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let outcome = tokio::select! {
        result = app.run(cli.command) => result,
        _ = shutdown_signal => Err(anyhow::anyhow!("Interrupted")),
    };

    app.shutdown().await?;

    let output = outcome?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to render output")?
    );
    Ok(())
}

/// Initialize logging; RUST_LOG and LOG_FORMAT override the configuration
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| logging.level.clone());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| logging.format.clone());

    let env_filter = tracing_subscriber::EnvFilter::try_new(&log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries command output
    match log_format.as_str() {
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to initialize pretty logging")?;
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to initialize JSON logging")?;
        }
    }

    if log_level == "trace" || log_level == "debug" {
        warn!("Debug/trace logging enabled - SQL and upload details will be verbose");
    }

    Ok(())
}
