//! Instrumented HTTP service.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────┐
//!                      │              INSTRUMENTED SERVICE          │
//!     Client Request   │  ┌──────────┐   ┌──────────────┐           │
//!     ─────────────────┼─▶│ request  │──▶│ observability│──┐        │
//!                      │  │   id     │   │  middleware  │  │        │
//!                      │  └──────────┘   └──────┬───────┘  ▼        │
//!                      │                        │     ┌─────────┐   │
//!     Client Response  │                        │     │ handlers│   │
//!     ◀────────────────┼────────────────────────┘◀────│ / /healthz /error
//!                      │                              └─────────┘   │
//!                      │  ┌──────────────────────────────────────┐  │
//!                      │  │ metrics (:9090) · spans (OTLP) ·     │  │
//!                      │  │ JSON logs (non-blocking stdout)      │  │
//!                      │  └──────────────────────────────────────┘  │
//!                      └────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use instrumented_service::config::{load_config, validation::validate_config, ConfigError};
use instrumented_service::lifecycle::{self, wait_for_signal};
use instrumented_service::observability::{
    install_panic_hook, logging::init_logging, trace::service_provider,
};
use instrumented_service::ServiceConfig;

#[derive(Parser)]
#[command(name = "instrumented-service")]
#[command(about = "Minimal web service with structured logs, metrics and tracing", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address (e.g. 127.0.0.1:8080).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    let _log_guard = init_logging(&config.observability)?;
    install_panic_hook();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = ?cli.config,
        "instrumented-service starting"
    );

    let provider = service_provider(&config.observability)?;
    let service = lifecycle::start(config, provider).await?;
    wait_for_signal().await;
    service.stop().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
