//! Job statistics.

use std::time::Duration;

use observability::MetricsSummary;

/// Outcome of one generation job
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    /// Valid descriptors in the plan
    pub planned: usize,

    /// Already complete on disk
    pub skipped: usize,

    /// Published during this job
    pub completed: usize,

    /// Aborted; eligible for the next run
    pub failed: usize,

    /// Seed table rows that could not become a sequence
    pub rejected_rows: usize,

    /// Skipped archives whose missing metadata row was restored
    pub backfilled: usize,

    /// Archives left without a metadata row (append or restore failed)
    pub ledger_failures: usize,

    /// Job stopped early on Ctrl-C / SIGTERM
    pub cancelled: bool,

    /// Total wall time of the job
    pub duration: Duration,

    /// Aggregated per-sequence metrics
    pub metrics: MetricsSummary,
}

impl JobStats {
    pub fn attempted(&self) -> usize {
        self.completed + self.failed
    }

    /// Every planned sequence now has an archive
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.skipped + self.completed == self.planned
    }

    /// Sequences still missing after this job
    pub fn remaining(&self) -> usize {
        self.planned.saturating_sub(self.skipped + self.completed)
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n================ Generation Job ================\n");
        println!("  Planned sequences:   {}", self.planned);
        println!("  Skipped (done):      {}", self.skipped);
        println!("  Completed:           {}", self.completed);
        println!("  Failed:              {}", self.failed);
        println!("  Rejected seed rows:  {}", self.rejected_rows);
        if self.backfilled > 0 {
            println!("  Rows restored:       {}", self.backfilled);
        }
        if self.ledger_failures > 0 {
            println!("  Ledger failures:     {}", self.ledger_failures);
        }
        println!("  Duration:            {:.2}s", self.duration.as_secs_f64());
        if self.cancelled {
            println!("  Interrupted: {} sequence(s) left for the next run", self.remaining());
        }
        println!();
        print!("{}", self.metrics);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_accounting() {
        let stats = JobStats {
            planned: 5,
            skipped: 2,
            completed: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.attempted(), 3);
        assert_eq!(stats.remaining(), 1);
        assert!(!stats.is_complete());

        let done = JobStats {
            planned: 3,
            skipped: 3,
            ..Default::default()
        };
        assert!(done.is_complete());
        assert_eq!(done.remaining(), 0);
    }
}
