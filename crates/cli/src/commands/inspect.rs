//! `inspect` command implementation.

use anyhow::{Context, Result};
use contracts::SensorKind;
use dispatcher::{ArchiveReader, CompletionLedger, LedgerRow};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::InspectArgs;

#[derive(Debug, Serialize)]
struct ArchiveInfo {
    path: String,
    bytes: u64,
    format_version: u32,
    seed: u64,
    map: String,
    created_at: String,
    streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger_row: Option<LedgerRow>,
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    entry: &'static str,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_time: Option<f64>,
    /// Mean spacing between consecutive timestamps
    #[serde(skip_serializing_if = "Option::is_none")]
    mean_interval: Option<f64>,
    /// Shape of the first payload
    #[serde(skip_serializing_if = "Option::is_none")]
    first_shape: Option<Vec<usize>>,
}

/// Execute the `inspect` command
pub fn run_inspect(args: &InspectArgs) -> Result<()> {
    info!(archive = %args.archive.display(), "Inspecting archive");

    let info = inspect(&args.archive)?;
    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize archive info")?;
        println!("{}", json);
    } else {
        print_archive_info(&info);
    }
    Ok(())
}

fn inspect(path: &std::path::Path) -> Result<ArchiveInfo> {
    let bytes = std::fs::metadata(path)
        .with_context(|| format!("Archive not found: {}", path.display()))?
        .len();
    let mut reader = ArchiveReader::open(path)
        .with_context(|| format!("Failed to open archive {}", path.display()))?;

    let mut streams = Vec::with_capacity(SensorKind::ALL.len());
    for kind in SensorKind::ALL {
        let times = reader
            .timestamps(kind)
            .with_context(|| format!("Failed to read {} timestamps", kind.archive_entry()))?;
        let first_shape = if times.is_empty() {
            None
        } else {
            Some(reader.payload(kind, 0)?.shape)
        };
        let mean_interval = (times.len() > 1)
            .then(|| (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64);
        streams.push(StreamInfo {
            entry: kind.archive_entry(),
            count: times.len() as u64,
            first_time: times.first().copied(),
            last_time: times.last().copied(),
            mean_interval,
            first_shape,
        });
    }

    let layout = reader.layout().clone();
    Ok(ArchiveInfo {
        path: path.display().to_string(),
        bytes,
        format_version: layout.format_version,
        seed: layout.seed,
        map: layout.map,
        created_at: layout.created_at,
        streams,
        ledger_row: ledger_row(path),
    })
}

/// The metadata row of this archive, if its folder has a ledger
fn ledger_row(path: &std::path::Path) -> Option<LedgerRow> {
    let folder = path.parent()?;
    let name = path.file_name()?.to_string_lossy().into_owned();
    let ledger = CompletionLedger::open(folder).ok()?;
    match ledger.rows() {
        Ok(rows) => rows.into_iter().rev().find(|r| r.output_name == name),
        Err(e) => {
            warn!(error = %e, "Unreadable metadata table");
            None
        }
    }
}

fn print_archive_info(info: &ArchiveInfo) {
    println!("\n=== Archive {} ===\n", info.path);
    println!("  Size: {:.2} MiB", info.bytes as f64 / (1024.0 * 1024.0));
    println!("  Format version: {}", info.format_version);
    println!("  Map / seed: {} / {}", info.map, info.seed);
    println!("  Created: {}", info.created_at);

    println!("\n  Streams:");
    for stream in &info.streams {
        print!("    {:<14} {:>6}", stream.entry, stream.count);
        if let (Some(first), Some(last)) = (stream.first_time, stream.last_time) {
            print!("  t=[{first:.3}s .. {last:.3}s]");
        }
        if let Some(dt) = stream.mean_interval {
            print!("  dt={dt:.4}s");
        }
        if let Some(ref shape) = stream.first_shape {
            print!("  shape[0]={shape:?}");
        }
        println!();
    }

    match info.ledger_row {
        Some(ref row) => println!(
            "\n  Ledger: {} ticks, {} events in {} packets",
            row.ticks, row.events, row.event_packets
        ),
        None => println!("\n  Ledger: no metadata row for this archive"),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{LidarCloud, LidarPoint, Sequence, SequenceDescriptor, SequenceSink, WeatherSpec};
    use dispatcher::ArchiveWriter;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_inspect_reports_streams() {
        let dir = tempdir().unwrap();
        let desc = SequenceDescriptor::new(21, "Town04", WeatherSpec::from_seed(21), dir.path());
        let mut sequence = Sequence::default();
        for i in 1..=3 {
            sequence.lidar.push(LidarCloud {
                points: vec![LidarPoint::default(); 2],
                production_time: i as f64 * 0.05,
            });
        }
        let archive = ArchiveWriter::with_level(1).publish(sequence, &desc).await.unwrap();
        CompletionLedger::open(dir.path())
            .unwrap()
            .record(&desc, &archive.sequence)
            .unwrap();

        let info = inspect(&desc.output_path).unwrap();
        assert_eq!(info.seed, 21);
        let lidar = &info.streams[1];
        assert_eq!(lidar.entry, "lidar_clouds");
        assert_eq!(lidar.count, 3);
        assert_eq!(lidar.first_shape, Some(vec![2, 4]));
        assert!((lidar.mean_interval.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(info.streams[2].count, 0);
        assert_eq!(info.ledger_row.unwrap().ticks, 3);
    }

    #[test]
    fn test_missing_archive() {
        assert!(inspect(std::path::Path::new("/nonexistent/Town01_1.npz")).is_err());
    }
}
