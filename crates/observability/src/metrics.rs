//! 数据集生成指标
//!
//! 提供 Prometheus 指标记录函数，以及用于作业结束摘要的内存聚合。

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{ContractError, SequenceSummary};
use metrics::{counter, histogram};

/// 序列结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SequenceStatus {
    Completed,
    Skipped,
    Failed,
}

impl SequenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// 记录一个录制 tick 及其屏障等待时间
pub fn record_tick(barrier_wait: Duration) {
    counter!("dataset_ticks_total").increment(1);
    histogram!("dataset_barrier_wait_ms").record(barrier_wait.as_secs_f64() * 1000.0);
}

/// 记录序列结局
pub fn record_sequence(status: SequenceStatus) {
    counter!("dataset_sequences_total", "status" => status.as_str()).increment(1);
}

/// 记录失败原因
pub fn record_sequence_failure(error: &ContractError) {
    record_sequence(SequenceStatus::Failed);
    counter!("dataset_sequence_failures_total", "kind" => error.kind()).increment(1);
}

/// 记录写出的归档大小
pub fn record_archive_bytes(bytes: u64) {
    histogram!("dataset_archive_bytes").record(bytes as f64);
}

/// 作业级指标聚合器
///
/// 在内存中聚合，作业结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct GenerationMetricsAggregator {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,

    /// 按错误类别统计的失败次数
    pub failures: BTreeMap<&'static str, u64>,

    /// 已完成序列的录制时长 (秒)
    pub sequence_secs: RunningStats,

    /// 已完成序列的归档大小 (MiB)
    pub archive_mib: RunningStats,

    /// 已完成序列的事件数
    pub events: RunningStats,
}

impl GenerationMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&mut self, summary: &SequenceSummary, archive_bytes: u64, took: Duration) {
        self.completed += 1;
        self.sequence_secs.push(took.as_secs_f64());
        self.archive_mib.push(archive_bytes as f64 / (1024.0 * 1024.0));
        self.events.push(summary.events as f64);
        record_sequence(SequenceStatus::Completed);
        record_archive_bytes(archive_bytes);
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
        record_sequence(SequenceStatus::Skipped);
    }

    pub fn record_failed(&mut self, error: &ContractError) {
        self.failed += 1;
        *self.failures.entry(error.kind()).or_insert(0) += 1;
        record_sequence_failure(error);
    }

    pub fn summary(&self) -> MetricsSummary {
        let attempted = self.completed + self.failed;
        MetricsSummary {
            completed: self.completed,
            skipped: self.skipped,
            failed: self.failed,
            failure_rate: if attempted > 0 {
                self.failed as f64 / attempted as f64 * 100.0
            } else {
                0.0
            },
            failures: self.failures.clone(),
            sequence_secs: StatsSummary::from(&self.sequence_secs),
            archive_mib: StatsSummary::from(&self.archive_mib),
            events: StatsSummary::from(&self.events),
        }
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub failures: BTreeMap<&'static str, u64>,
    pub sequence_secs: StatsSummary,
    pub archive_mib: StatsSummary,
    pub events: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Generation Summary ===")?;
        writeln!(f, "Completed: {}", self.completed)?;
        writeln!(f, "Skipped (already done): {}", self.skipped)?;
        writeln!(f, "Failed: {} ({:.2}%)", self.failed, self.failure_rate)?;
        writeln!(f, "Sequence time (s): {}", self.sequence_secs)?;
        writeln!(f, "Archive size (MiB): {}", self.archive_mib)?;
        writeln!(f, "Events per sequence: {}", self.events)?;

        if !self.failures.is_empty() {
            writeln!(f, "Failures by kind:")?;
            for (kind, count) in &self.failures {
                writeln!(f, "  {kind}: {count}")?;
            }
        }
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
