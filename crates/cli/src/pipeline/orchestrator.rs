//! Dataset driver - runs a sequence plan end to end.
//!
//! For each descriptor: skip if its archive exists, otherwise
//! reconnect if needed, record, publish, append to the ledger.
//! A skipped archive without a metadata row gets its row back.
//! Sequence-level failures are counted and the job moves on; only the
//! initial connection is fatal.

use std::collections::HashSet;
use std::time::Instant;

use actor_factory::SimulatorClient;
use config_loader::SequencePlan;
use contracts::{ArchiveSummary, ContractError, GenerationConfig, SequenceDescriptor, SequenceSink};
use dispatcher::CompletionLedger;
use observability::GenerationMetricsAggregator;
use sync_engine::SimulationDriver;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::JobStats;

/// Job-level driver over one simulator connection
pub struct DatasetDriver<C: SimulatorClient, S: SequenceSink> {
    simulation: SimulationDriver<C>,
    sink: S,
    ledger: CompletionLedger,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: SimulatorClient, S: SequenceSink> DatasetDriver<C, S> {
    pub fn new(client: C, config: GenerationConfig, sink: S, ledger: CompletionLedger) -> Self {
        Self {
            simulation: SimulationDriver::new(client, config),
            sink,
            ledger,
            cancel: None,
        }
    }

    /// Stop after the current sequence aborts once the channel turns `true`
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.simulation = self.simulation.with_cancel(cancel.clone());
        self.cancel = Some(cancel);
        self
    }

    pub fn simulation(&self) -> &SimulationDriver<C> {
        &self.simulation
    }

    pub fn ledger(&self) -> &CompletionLedger {
        &self.ledger
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run every descriptor of `plan`, in order
    ///
    /// # Errors
    /// Only when the simulator cannot be reached at job start.
    #[instrument(name = "dataset_job", skip(self, plan), fields(planned = plan.len()))]
    pub async fn run(&mut self, plan: SequencePlan) -> Result<JobStats, ContractError> {
        let started = Instant::now();
        let mut stats = JobStats {
            planned: plan.len(),
            rejected_rows: plan.rejected().len(),
            ..Default::default()
        };
        let mut metrics = GenerationMetricsAggregator::new();

        self.ledger.sweep_stale_temporaries();
        let mut recorded = match self.ledger.recorded_names() {
            Ok(names) => Some(names),
            Err(e) => {
                warn!(error = %e, "Metadata table unreadable, missing rows will not be restored");
                None
            }
        };

        let pending = plan
            .descriptors()
            .iter()
            .filter(|d| !self.ledger.is_done(d))
            .count();
        if pending > 0 {
            self.simulation.connect().await?;
        }
        info!(pending, out = %self.ledger.out_folder().display(), "Job started");

        for descriptor in plan {
            if self.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            if self.ledger.is_done(&descriptor) {
                info!(output = %descriptor.output_name(), "Already done, skipping");
                stats.skipped += 1;
                metrics.record_skipped();
                if let Some(recorded) = recorded.as_mut() {
                    self.restore_row(&descriptor, recorded, &mut stats);
                }
                continue;
            }

            let sequence_started = Instant::now();
            match self.generate(&descriptor).await {
                Ok(archive) => {
                    stats.completed += 1;
                    metrics.record_completed(
                        &archive.sequence,
                        archive.bytes,
                        sequence_started.elapsed(),
                    );
                    match self.ledger.record(&descriptor, &archive.sequence) {
                        Ok(()) => {
                            if let Some(recorded) = recorded.as_mut() {
                                recorded.insert(descriptor.output_name());
                            }
                        }
                        Err(e) => {
                            stats.ledger_failures += 1;
                            error!(error = %e, output = %descriptor.output_name(), "Archive published but metadata row not written");
                        }
                    }
                }
                Err(ContractError::Cancelled) => {
                    warn!(output = %descriptor.output_name(), "Sequence interrupted");
                    stats.cancelled = true;
                    break;
                }
                Err(e) => {
                    stats.failed += 1;
                    metrics.record_failed(&e);
                    error!(
                        error = %e,
                        kind = e.kind(),
                        retryable = e.is_retryable(),
                        seed = descriptor.seed,
                        map = %descriptor.map_name,
                        "Sequence failed"
                    );
                }
            }
        }

        stats.duration = started.elapsed();
        stats.metrics = metrics.summary();
        info!(
            completed = stats.completed,
            skipped = stats.skipped,
            failed = stats.failed,
            cancelled = stats.cancelled,
            duration_secs = stats.duration.as_secs_f64(),
            "Job finished"
        );
        Ok(stats)
    }

    /// Append the row of a finished archive the metadata table lacks
    fn restore_row(
        &self,
        descriptor: &SequenceDescriptor,
        recorded: &mut HashSet<String>,
        stats: &mut JobStats,
    ) {
        let name = descriptor.output_name();
        if recorded.contains(&name) {
            return;
        }
        match self.ledger.backfill(descriptor) {
            Ok(_) => {
                stats.backfilled += 1;
                recorded.insert(name);
            }
            Err(e) => {
                stats.ledger_failures += 1;
                warn!(error = %e, output = %name, "Archive has no metadata row and cannot be read");
            }
        }
    }

    /// Record and publish one sequence
    async fn generate(&mut self, descriptor: &SequenceDescriptor) -> Result<ArchiveSummary, ContractError> {
        if self.simulation.reconnect_if_needed().await? {
            info!("Reconnected to simulator");
        }
        let sequence = self.simulation.run(descriptor).await?;
        self.sink.publish(sequence, descriptor).await
    }
}
