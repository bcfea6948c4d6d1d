//! # generate_dataset
//!
//! 命令行接口入口点。

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use dataset_cli::cli::{Cli, Commands};
use dataset_cli::commands::{run_generate, run_inspect, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "generate_dataset starting"
    );

    let result = match &cli.command {
        None => run_generate(&cli.generate).await.map(|_| ()),
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging (and the metrics exporter for generation runs)
fn init_logging(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: cli
            .command
            .is_none()
            .then_some(cli.generate.metrics_port)
            .flatten(),
        default_log_level: default_log_level.to_string(),
    })
}
