//! ArchiveWriter / ArchiveReader - compressed per-sequence archives
//!
//! One ZIP container per sequence (format version 1). Each of the four
//! entries (`events`, `lidar_clouds`, `rgb_images`, `depth_images`) holds a
//! `timestamps.npy` (`<f8`, shape `(N,)`) and one `.npy` member per payload,
//! so the i-th payload pairs with the i-th timestamp. `layout.json` carries
//! the format version, per-entry counts and the sequence summary.
//!
//! Archives of the legacy layout (version 0) stored each entry as a pickled
//! `(N, 2)` object array. The same pairs are rebuilt from version 1 with:
//!
//! ```python
//! import json, zipfile
//! import numpy as np
//!
//! def load_sequence(path):
//!     seq = np.load(path)
//!     with zipfile.ZipFile(path) as z:
//!         layout = json.loads(z.read("layout.json"))
//!     out = {}
//!     for entry, count in layout["entries"].items():
//!         ts = seq[f"{entry}/timestamps"]
//!         pairs = np.empty((count, 2), dtype=object)
//!         for i in range(count):
//!             pairs[i, 0] = seq[f"{entry}/{i:06}"]
//!             pairs[i, 1] = ts[i]
//!         out[entry] = pairs
//!     return out
//! ```
//!
//! `load_sequence(path)["events"]` then has the shape the visualizer expects.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use contracts::{
    ArchiveConfig, ArchiveSummary, ContractError, Event, ImageFrame, LidarPoint, Sequence,
    SequenceDescriptor, SequenceSink, SequenceSummary, SensorKind,
};
use ingestion::{check_bgra, decode_events, decode_lidar, encode_events};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{DispatcherError, Result};
use crate::npy::{self, NpyArray};

pub const FORMAT_VERSION: u32 = 1;
pub const LAYOUT_MEMBER: &str = "layout.json";
pub const TIMESTAMPS_MEMBER: &str = "timestamps.npy";

/// `layout.json` content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveLayout {
    pub format_version: u32,
    /// entry name → payload count
    pub entries: BTreeMap<String, u64>,
    pub seed: u64,
    pub map: String,
    /// RFC 3339, wall clock at write time (never part of the recorded data)
    pub created_at: String,
    /// Same counts as the metadata row
    #[serde(default)]
    pub summary: SequenceSummary,
}

impl ArchiveLayout {
    pub fn count(&self, kind: SensorKind) -> u64 {
        self.entries.get(kind.archive_entry()).copied().unwrap_or(0)
    }
}

fn payload_member(kind: SensorKind, index: usize) -> String {
    format!("{}/{index:06}.npy", kind.archive_entry())
}

fn timestamps_member(kind: SensorKind) -> String {
    format!("{}/{TIMESTAMPS_MEMBER}", kind.archive_entry())
}

/// Writes one sequence archive, atomically
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    name: String,
    compression_level: u8,
}

impl ArchiveWriter {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self::with_level(config.compression_level)
    }

    pub fn with_level(compression_level: u8) -> Self {
        Self {
            name: "npz_archive".to_string(),
            compression_level: compression_level.min(9),
        }
    }

    pub fn compression_level(&self) -> u8 {
        self.compression_level
    }

    fn file_options(&self) -> SimpleFileOptions {
        // level 0 = stored
        if self.compression_level == 0 {
            return SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        }
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level as i64))
    }
}

impl SequenceSink for ArchiveWriter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "archive_publish",
        skip(self, sequence, descriptor),
        fields(path = %descriptor.output_path.display())
    )]
    async fn publish(
        &self,
        sequence: Sequence,
        descriptor: &SequenceDescriptor,
    ) -> std::result::Result<ArchiveSummary, ContractError> {
        let path = descriptor.output_path.clone();
        let summary = sequence.summary();
        let options = self.file_options();
        let seed = descriptor.seed;
        let map = descriptor.map_name.clone();

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            write_archive(&sequence, seed, map, &target, options)
        })
        .await
        .map_err(DispatcherError::from)
        .and_then(|r| r);

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Archive write failed");
                return Err(e.into_archive_error(&path));
            }
        };

        info!(
            bytes,
            ticks = summary.ticks,
            event_packets = summary.event_packets,
            "Archive published"
        );
        Ok(ArchiveSummary {
            path,
            bytes,
            sequence: summary,
        })
    }
}

/// Serialize into a temporary sibling, fsync, rename into place.
///
/// On error the `NamedTempFile` guard removes the temporary.
fn write_archive(
    sequence: &Sequence,
    seed: u64,
    map: String,
    path: &Path,
    options: SimpleFileOptions,
) -> Result<u64> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    {
        let mut zip = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));
        let mut entries = BTreeMap::new();

        for kind in SensorKind::ALL {
            let times = sequence.frame_times(kind);
            let raw: Vec<u8> = times.iter().flat_map(|t| t.to_le_bytes()).collect();
            zip.start_file(timestamps_member(kind), options)?;
            npy::write_array(&mut zip, npy::DESCR_F8, &[times.len()], &raw)?;
            entries.insert(kind.archive_entry().to_string(), times.len() as u64);
        }

        for (i, packet) in sequence.events.iter().enumerate() {
            zip.start_file(payload_member(SensorKind::Events, i), options)?;
            npy::write_array(
                &mut zip,
                npy::DESCR_EVENT,
                &[packet.events.len()],
                &encode_events(&packet.events),
            )?;
        }
        for (i, cloud) in sequence.lidar.iter().enumerate() {
            // LidarPoint is repr(C) f32×4; native byte order is little-endian on supported targets
            zip.start_file(payload_member(SensorKind::Lidar, i), options)?;
            npy::write_array(
                &mut zip,
                npy::DESCR_F4,
                &[cloud.points.len(), 4],
                bytemuck::cast_slice(cloud.points.as_slice()),
            )?;
        }
        for (kind, frames) in [
            (SensorKind::Rgb, &sequence.rgb),
            (SensorKind::Depth, &sequence.depth),
        ] {
            for (i, frame) in frames.iter().enumerate() {
                check_bgra(kind, frame.width, frame.height, &frame.pixels)?;
                zip.start_file(payload_member(kind, i), options)?;
                npy::write_array(
                    &mut zip,
                    npy::DESCR_U1,
                    &[frame.height as usize, frame.width as usize, 4],
                    &frame.pixels,
                )?;
            }
        }

        let layout = ArchiveLayout {
            format_version: FORMAT_VERSION,
            entries,
            seed,
            map,
            created_at: chrono::Utc::now().to_rfc3339(),
            summary: sequence.summary(),
        };
        zip.start_file(LAYOUT_MEMBER, options)?;
        serde_json::to_writer_pretty(&mut zip, &layout)?;

        zip.finish()?.flush()?;
    }

    tmp.as_file().sync_all()?;
    let file = tmp.persist(path).map_err(|e| e.error)?;
    let bytes = file.metadata()?.len();
    debug!(path = %path.display(), bytes, "Temporary archive renamed into place");
    Ok(bytes)
}

/// Read-side view of an archive
pub struct ArchiveReader {
    path: PathBuf,
    zip: ZipArchive<BufReader<File>>,
    layout: ArchiveLayout,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut zip = ZipArchive::new(BufReader::new(File::open(&path)?))?;
        let layout: ArchiveLayout = serde_json::from_reader(zip.by_name(LAYOUT_MEMBER)?)?;
        if layout.format_version != FORMAT_VERSION {
            return Err(DispatcherError::format(format!(
                "unsupported archive format version {}",
                layout.format_version
            )));
        }
        Ok(Self { path, zip, layout })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Number of members in the container
    pub fn member_count(&self) -> usize {
        self.zip.len()
    }

    fn read_member(&mut self, name: &str) -> Result<NpyArray> {
        let mut member = self.zip.by_name(name)?;
        let mut buf = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut buf)?;
        npy::parse(&buf)
    }

    pub fn timestamps(&mut self, kind: SensorKind) -> Result<Vec<f64>> {
        self.read_member(&timestamps_member(kind))?.to_f64()
    }

    pub fn payload(&mut self, kind: SensorKind, index: usize) -> Result<NpyArray> {
        self.read_member(&payload_member(kind, index))
    }

    pub fn events(&mut self, index: usize) -> Result<Vec<Event>> {
        let arr = self.payload(SensorKind::Events, index)?;
        if arr.descr != npy::DESCR_EVENT {
            return Err(DispatcherError::format(format!(
                "event payload has dtype {}",
                arr.descr
            )));
        }
        Ok(decode_events(&arr.data)?)
    }

    pub fn lidar(&mut self, index: usize) -> Result<Vec<LidarPoint>> {
        let arr = self.payload(SensorKind::Lidar, index)?;
        if arr.descr != npy::DESCR_F4 {
            return Err(DispatcherError::format("malformed lidar payload"));
        }
        Ok(decode_lidar(&arr.data)?)
    }

    /// Every (payload, timestamp) pair of one entry, in order
    pub fn pairs(&mut self, kind: SensorKind) -> Result<Vec<(NpyArray, f64)>> {
        let times = self.timestamps(kind)?;
        times
            .into_iter()
            .enumerate()
            .map(|(i, t)| Ok((self.payload(kind, i)?, t)))
            .collect()
    }

    /// RGB or depth frame `index`, with its timestamp
    pub fn image(&mut self, kind: SensorKind, index: usize) -> Result<ImageFrame> {
        let production_time = self
            .timestamps(kind)?
            .get(index)
            .copied()
            .ok_or_else(|| DispatcherError::format(format!("{kind} has no frame {index}")))?;
        let arr = self.payload(kind, index)?;
        let [height, width, 4] = arr.shape[..] else {
            return Err(DispatcherError::format(format!(
                "{kind} frame has shape {:?}",
                arr.shape
            )));
        };
        Ok(ImageFrame {
            width: width as u32,
            height: height as u32,
            pixels: arr.data.into(),
            production_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{encode_depth, EventPacket, LidarCloud, WeatherSpec};
    use tempfile::tempdir;

    const DT: f64 = 0.05;

    fn frame(width: u32, height: u32, fill: [u8; 4], t: f64) -> ImageFrame {
        let pixels: Vec<u8> = std::iter::repeat_n(fill, (width * height) as usize)
            .flatten()
            .collect();
        ImageFrame {
            width,
            height,
            pixels: Bytes::from(pixels),
            production_time: t,
        }
    }

    fn sample_sequence(ticks: usize) -> Sequence {
        let mut seq = Sequence::default();
        for i in 0..ticks {
            let t = (i + 1) as f64 * DT;
            seq.lidar.push(LidarCloud {
                points: vec![
                    LidarPoint {
                        x: i as f32,
                        y: 1.0,
                        z: -1.5,
                        intensity: 0.5,
                    };
                    3
                ],
                production_time: t,
            });
            seq.rgb.push(frame(4, 2, [10, 20, 30, 255], t));
            seq.depth.push(frame(4, 2, encode_depth(12.5), t));
        }
        // variable-rate event stream, one empty packet included
        for (i, n) in [2usize, 0, 5].into_iter().enumerate() {
            seq.events.push(EventPacket {
                events: (0..n)
                    .map(|k| Event {
                        x: k as u16,
                        y: 7,
                        t: 1_000 * k as i64,
                        polarity: k % 2 == 0,
                    })
                    .collect(),
                production_time: 0.02 * (i + 1) as f64,
            });
        }
        seq
    }

    fn descriptor(dir: &Path, seed: u64) -> SequenceDescriptor {
        SequenceDescriptor::new(seed, "Town03", WeatherSpec::from_seed(seed), dir)
    }

    fn leftover_temporaries(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn test_publish_and_read_back() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 42);
        let writer = ArchiveWriter::with_level(1);

        let out = writer.publish(sample_sequence(4), &desc).await.unwrap();
        assert_eq!(out.path, desc.output_path);
        assert!(out.bytes > 0);
        assert_eq!(out.sequence.ticks, 4);
        assert_eq!(leftover_temporaries(dir.path()), 0);

        let mut reader = ArchiveReader::open(&desc.output_path).unwrap();
        assert_eq!(reader.layout().seed, 42);
        assert_eq!(reader.layout().map, "Town03");
        assert_eq!(reader.layout().count(SensorKind::Lidar), 4);
        assert_eq!(reader.layout().count(SensorKind::Events), 3);
        // 4 timestamps + 4×3 frames + 3 packets + layout
        assert_eq!(reader.member_count(), 4 + 12 + 3 + 1);

        let times = reader.timestamps(SensorKind::Rgb).unwrap();
        assert_eq!(times.len(), 4);
        assert!((times[3] - 0.2).abs() < 1e-12);

        let cloud = reader.payload(SensorKind::Lidar, 2).unwrap();
        assert_eq!(cloud.shape, vec![3, 4]);
        assert_eq!(reader.lidar(2).unwrap()[0].x, 2.0);

        let rgb = reader.payload(SensorKind::Rgb, 0).unwrap();
        assert_eq!(rgb.shape, vec![2, 4, 4]);
        assert_eq!(&rgb.data[..4], &[10, 20, 30, 255]);

        assert!(reader.events(1).unwrap().is_empty());
        let events = reader.events(2).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[3], Event { x: 3, y: 7, t: 3_000, polarity: false });
    }

    #[tokio::test]
    async fn test_depth_survives_archive() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 7);
        ArchiveWriter::with_level(0)
            .publish(sample_sequence(2), &desc)
            .await
            .unwrap();

        let mut reader = ArchiveReader::open(&desc.output_path).unwrap();
        let depth = reader.image(SensorKind::Depth, 1).unwrap();
        let meters = contracts::decode_depth(depth.bgra_at(1, 3).unwrap());
        assert!((meters - 12.5).abs() <= contracts::DEPTH_RESOLUTION_METERS);
        assert!((depth.production_time - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_nothing() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 1);
        // a directory squatting on the target makes the rename fail
        std::fs::create_dir(&desc.output_path).unwrap();

        let err = ArchiveWriter::with_level(1)
            .publish(sample_sequence(2), &desc)
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::ArchiveWriteFailure { .. }));
        assert!(err.is_retryable());
        assert_eq!(leftover_temporaries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_sequence_is_well_formed() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 3);
        ArchiveWriter::with_level(1)
            .publish(Sequence::default(), &desc)
            .await
            .unwrap();

        let mut reader = ArchiveReader::open(&desc.output_path).unwrap();
        assert!(reader.timestamps(SensorKind::Depth).unwrap().is_empty());
        assert_eq!(reader.member_count(), 5);
    }

    #[tokio::test]
    async fn test_member_names_are_stable() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 8);
        ArchiveWriter::with_level(1)
            .publish(sample_sequence(1), &desc)
            .await
            .unwrap();

        let reader = ArchiveReader::open(&desc.output_path).unwrap();
        let mut names: Vec<&str> = reader.zip.file_names().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "depth_images/000000.npy",
                "depth_images/timestamps.npy",
                "events/000000.npy",
                "events/000001.npy",
                "events/000002.npy",
                "events/timestamps.npy",
                "layout.json",
                "lidar_clouds/000000.npy",
                "lidar_clouds/timestamps.npy",
                "rgb_images/000000.npy",
                "rgb_images/timestamps.npy",
            ]
        );
        assert_eq!(reader.layout().format_version, 1);
        assert_eq!(reader.layout().summary, sample_sequence(1).summary());
    }

    #[tokio::test]
    async fn test_pairs_match_payloads_with_timestamps() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 9);
        ArchiveWriter::with_level(1)
            .publish(sample_sequence(3), &desc)
            .await
            .unwrap();

        let mut reader = ArchiveReader::open(&desc.output_path).unwrap();
        let pairs = reader.pairs(SensorKind::Lidar).unwrap();
        assert_eq!(pairs.len(), 3);
        for (i, (cloud, t)) in pairs.iter().enumerate() {
            assert_eq!(cloud.shape, vec![3, 4]);
            assert!((t - (i + 1) as f64 * DT).abs() < 1e-12);
        }
        let events = reader.pairs(SensorKind::Events).unwrap();
        assert_eq!(events[2].0.shape, vec![5]);
        assert!((events[2].1 - 0.06).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_frame_with_wrong_pixel_count_is_rejected() {
        let dir = tempdir().unwrap();
        let desc = descriptor(dir.path(), 10);
        let mut sequence = sample_sequence(2);
        sequence.rgb[1].pixels = Bytes::from(vec![0u8; 5]);

        let err = ArchiveWriter::with_level(1)
            .publish(sequence, &desc)
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::ArchiveWriteFailure { .. }));
        assert!(err.to_string().contains("32 bytes"), "{err}");
        assert!(!desc.output_path.exists());
        assert_eq!(leftover_temporaries(dir.path()), 0);
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(ArchiveWriter::with_level(42).compression_level(), 9);
        assert_eq!(ArchiveWriter::new(&ArchiveConfig::default()).compression_level(), 1);
    }
}
