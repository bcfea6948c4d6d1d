//! Default command: generate the dataset.

use std::path::Path;

use actor_factory::{MockSimulator, SimulatorClient};
use anyhow::{Context, Result};
use config_loader::{ConfigLoader, SequencePlan};
use contracts::GenerationConfig;
use dispatcher::{ArchiveWriter, CompletionLedger};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::GenerateArgs;
use crate::pipeline::{DatasetDriver, JobStats};

/// Load the generation config, or the validated defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<GenerationConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            let config = GenerationConfig::default();
            ConfigLoader::validate(&config).context("Built-in defaults are invalid")?;
            Ok(config)
        }
    }
}

/// Seed table when given, otherwise `nb_seq` timestamp-seeded sequences
fn build_plan(args: &GenerateArgs, config: &GenerationConfig) -> Result<SequencePlan> {
    let maps = &config.simulation.allowed_maps;
    match &args.seeds {
        Some(seeds) => SequencePlan::from_path(seeds, &args.outfolder, maps)
            .with_context(|| format!("Failed to read seed table {}", seeds.display())),
        None => {
            info!(count = args.nb_seq, "No seed table, generating random seeds");
            Ok(SequencePlan::random(
                args.nb_seq,
                chrono::Local::now(),
                &args.outfolder,
                maps,
            ))
        }
    }
}

/// Mock output and simulator output never share a folder
fn check_output_origin(ledger: &CompletionLedger, mock: bool) -> Result<()> {
    let folder = ledger.out_folder().display();
    match (mock, ledger.is_mock_output()) {
        (true, false) if ledger.has_output() => anyhow::bail!(
            "{folder} holds simulator output; refusing to add mock sequences to it"
        ),
        (true, false) => ledger
            .mark_mock_output()
            .with_context(|| format!("Cannot mark {folder} as mock output"))?,
        (false, true) => anyhow::bail!(
            "{folder} holds mock simulator output; choose another --outfolder"
        ),
        _ => {}
    }
    Ok(())
}

#[cfg(feature = "real-carla")]
fn simulator_available() -> Result<()> {
    Ok(())
}

#[cfg(not(feature = "real-carla"))]
fn simulator_available() -> Result<()> {
    anyhow::bail!("Built without the `real-carla` feature: rebuild with it, or pass --mock")
}

#[cfg(feature = "real-carla")]
async fn drive_simulator(
    config: GenerationConfig,
    plan: SequencePlan,
    ledger: CompletionLedger,
    cancel: watch::Receiver<bool>,
) -> Result<JobStats> {
    drive(actor_factory::RealCarlaClient::new(), config, plan, ledger, cancel).await
}

#[cfg(not(feature = "real-carla"))]
async fn drive_simulator(
    _config: GenerationConfig,
    _plan: SequencePlan,
    _ledger: CompletionLedger,
    _cancel: watch::Receiver<bool>,
) -> Result<JobStats> {
    simulator_available().map(|()| JobStats::default())
}

async fn drive<C: SimulatorClient>(
    client: C,
    config: GenerationConfig,
    plan: SequencePlan,
    ledger: CompletionLedger,
    cancel: watch::Receiver<bool>,
) -> Result<JobStats> {
    let endpoint = format!("{}:{}", config.simulator.host, config.simulator.port);
    let writer = ArchiveWriter::new(&config.archive);
    let mut job = DatasetDriver::new(client, config, writer, ledger).with_cancel(cancel);
    job.run(plan)
        .await
        .with_context(|| format!("Cannot reach simulator at {endpoint}"))
}

/// Execute a generation job
pub async fn run_generate(args: &GenerateArgs) -> Result<JobStats> {
    let mut config = load_config(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding simulator host from CLI");
        config.simulator.host = host.clone();
    }
    if let Some(port) = args.port {
        info!(port, "Overriding simulator port from CLI");
        config.simulator.port = port;
    }

    let plan = build_plan(args, &config)?;
    info!(
        sequences = plan.len(),
        rejected_rows = plan.rejected().len(),
        ticks = config.simulation.recorded_ticks(),
        tick_hz = config.simulation.tick_hz,
        out = %args.outfolder.display(),
        "Plan ready"
    );
    if plan.is_empty() {
        warn!("No valid sequence in the plan");
    }

    if !args.mock {
        simulator_available()?;
    }
    let ledger = CompletionLedger::open(&args.outfolder)
        .with_context(|| format!("Cannot use output folder {}", args.outfolder.display()))?;
    check_output_origin(&ledger, args.mock)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, aborting current sequence...");
        let _ = cancel_tx.send(true);
    });

    let stats = if args.mock {
        warn!("Driving the built-in mock simulator: archives hold synthetic test data");
        drive(MockSimulator::new(), config, plan, ledger, cancel_rx).await?
    } else {
        drive_simulator(config, plan, ledger, cancel_rx).await?
    };
    stats.print_summary();
    Ok(stats)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
}
