// Coursive Course Engine
// Main entry point for the coursive binary

use clap::Parser;
use coursive_engine::cli::{Cli, Command};
use coursive_engine::config::Config;
use coursive_engine::handlers::{handle_serve, handle_show, handle_validate};
use coursive_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    tracing::info!("Coursive Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with the CLI override or config-driven level
    // (only takes effect if RUST_LOG env var is not set)
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    match cli.command {
        Command::Serve => {
            tracing::info!("Starting scheduler daemon...");
            handle_serve(&config).await
        }

        Command::Validate { path } => {
            tracing::info!("Validating course script: {}", path.display());
            handle_validate(&path).await
        }

        Command::Show { course_id } => {
            tracing::info!("Showing course: {}", course_id);
            handle_show(&course_id, &config).await
        }
    }
}
