//! Collector counters

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::SensorKind;

fn slot(kind: SensorKind) -> usize {
    match kind {
        SensorKind::Events => 0,
        SensorKind::Lidar => 1,
        SensorKind::Rgb => 2,
        SensorKind::Depth => 3,
    }
}

/// Collector metrics
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    /// Samples appended per stream (events, lidar, rgb, depth)
    appended: [AtomicU64; 4],

    /// Frame readings with a repeated or older simulator frame
    out_of_order: AtomicU64,

    /// Readings whose payload does not match the registered stream
    mismatched: AtomicU64,

    /// Images whose buffer does not match width × height × 4
    malformed: AtomicU64,
}

impl CollectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_appended(&self, kind: SensorKind) {
        self.appended[slot(kind)].fetch_add(1, Ordering::Relaxed);
        if kind == SensorKind::Events {
            metrics::counter!("dataset_event_packets_total").increment(1);
        }
    }

    pub fn record_out_of_order(&self, kind: SensorKind) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dataset_frames_out_of_order_total", "sensor" => kind.to_string())
            .increment(1);
    }

    pub fn record_mismatched(&self) {
        self.mismatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, kind: SensorKind) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dataset_frames_malformed_total", "sensor" => kind.to_string())
            .increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.appended[0].load(Ordering::Relaxed),
            lidar: self.appended[1].load(Ordering::Relaxed),
            rgb: self.appended[2].load(Ordering::Relaxed),
            depth: self.appended[3].load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            mismatched: self.mismatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
///
/// Counts cover the collector's whole life, warm-up included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events: u64,
    pub lidar: u64,
    pub rgb: u64,
    pub depth: u64,
    pub out_of_order: u64,
    pub mismatched: u64,
    pub malformed: u64,
}

impl MetricsSnapshot {
    pub fn appended(&self, kind: SensorKind) -> u64 {
        match kind {
            SensorKind::Events => self.events,
            SensorKind::Lidar => self.lidar,
            SensorKind::Rgb => self.rgb,
            SensorKind::Depth => self.depth,
        }
    }
}
