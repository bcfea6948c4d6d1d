//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// generate_dataset - synthetic event/LiDAR/RGB/depth driving sequences
#[derive(Parser, Debug)]
#[command(
    name = "generate_dataset",
    author,
    version,
    about = "Synthetic multi-sensor driving dataset generator",
    long_about = "Drives the simulator in lock-step, records event camera, LiDAR, RGB and depth \n\
                  streams for every row of a seed table, and writes one compressed archive per \n\
                  sequence. Interrupted jobs resume: finished archives are skipped."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DATASET_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DATASET_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub generate: GenerateArgs,
}

/// Auxiliary commands; without one the generator runs
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the generation config and the seed table without touching the simulator
    Validate(ValidateArgs),

    /// Print the layout and stream statistics of a finished archive
    Inspect(InspectArgs),
}

/// Arguments of the generator itself
#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Seed table (`seed` and `map` columns, `;` or `,` delimited)
    #[arg(long, env = "DATASET_SEEDS")]
    pub seeds: Option<PathBuf>,

    /// Output folder for archives and metadata.csv
    #[arg(long, default_value = "data", env = "DATASET_OUTFOLDER")]
    pub outfolder: PathBuf,

    /// Number of random sequences when no seed table is given
    #[arg(long, default_value = "1", env = "DATASET_NB_SEQ")]
    pub nb_seq: usize,

    /// Generation config (TOML or JSON); built-in defaults when absent
    #[arg(short, long, env = "DATASET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override simulator host from configuration
    #[arg(long, env = "CARLA_HOST")]
    pub host: Option<String>,

    /// Override simulator port from configuration
    #[arg(long, env = "CARLA_PORT")]
    pub port: Option<u16>,

    /// Expose Prometheus metrics on this port
    #[arg(long, env = "DATASET_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Drive the built-in mock simulator instead of CARLA.
    /// The output folder is marked and never mixed with simulator output.
    #[arg(long, env = "DATASET_MOCK")]
    pub mock: bool,
}

/// Arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Generation config to validate; built-in defaults when absent
    #[arg(short, long, env = "DATASET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seed table to check against the allowed maps
    #[arg(long, env = "DATASET_SEEDS")]
    pub seeds: Option<PathBuf>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archive produced by the generator
    pub archive: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
