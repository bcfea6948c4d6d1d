//! CompletionLedger - which sequences are done
//!
//! A sequence is complete iff its archive exists at the output path.
//! `metadata.csv` is an append-only, `;`-delimited record of published
//! archives; it is never rewritten. An archive published without its row
//! (crash between rename and append) gets the row back from its own
//! `layout.json` through `backfill`.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use contracts::{ContractError, SequenceDescriptor, SequenceSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::archive::ArchiveReader;
use crate::error::{DispatcherError, Result};

pub const METADATA_FILE: &str = "metadata.csv";
/// Present in folders filled by the mock simulator
pub const MOCK_MARKER: &str = ".mock_simulator";
const DELIMITER: u8 = b';';

/// One row of `metadata.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub output_name: String,
    pub seed: u64,
    pub map: String,
    pub ticks: u64,
    pub event_packets: u64,
    pub events: u64,
    pub lidar_clouds: u64,
    pub rgb_frames: u64,
    pub depth_frames: u64,
}

impl LedgerRow {
    pub fn new(descriptor: &SequenceDescriptor, summary: &SequenceSummary) -> Self {
        Self {
            output_name: descriptor.output_name(),
            seed: descriptor.seed,
            map: descriptor.map_name.clone(),
            ticks: summary.ticks,
            event_packets: summary.event_packets,
            events: summary.events,
            lidar_clouds: summary.lidar_clouds,
            rgb_frames: summary.rgb_frames,
            depth_frames: summary.depth_frames,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionLedger {
    out_folder: PathBuf,
    metadata_path: PathBuf,
}

impl CompletionLedger {
    /// Open (and create if needed) the output folder
    pub fn open(out_folder: impl Into<PathBuf>) -> std::result::Result<Self, ContractError> {
        let out_folder = out_folder.into();
        fs::create_dir_all(&out_folder)?;
        let metadata_path = out_folder.join(METADATA_FILE);
        Ok(Self {
            out_folder,
            metadata_path,
        })
    }

    pub fn out_folder(&self) -> &Path {
        &self.out_folder
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    pub fn is_done(&self, descriptor: &SequenceDescriptor) -> bool {
        descriptor.output_path.exists()
    }

    /// Output names that already have a row
    pub fn recorded_names(&self) -> std::result::Result<HashSet<String>, ContractError> {
        Ok(self.rows()?.into_iter().map(|r| r.output_name).collect())
    }

    /// Append the missing row of an already published archive
    ///
    /// The counts come from the archive's `layout.json`.
    #[instrument(name = "ledger_backfill", skip(self), fields(output = %descriptor.output_name()))]
    pub fn backfill(
        &self,
        descriptor: &SequenceDescriptor,
    ) -> std::result::Result<SequenceSummary, ContractError> {
        let summary = ArchiveReader::open(&descriptor.output_path)
            .map(|reader| reader.layout().summary)
            .map_err(|e| e.into_ledger_error(&descriptor.output_path))?;
        self.record(descriptor, &summary)?;
        info!(ticks = summary.ticks, "Metadata row restored from archive");
        Ok(summary)
    }

    /// Metadata table or any archive present
    pub fn has_output(&self) -> bool {
        if self.metadata_path.exists() {
            return true;
        }
        fs::read_dir(&self.out_folder)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_name().to_string_lossy().ends_with(".npz"))
            })
            .unwrap_or(false)
    }

    pub fn is_mock_output(&self) -> bool {
        self.out_folder.join(MOCK_MARKER).exists()
    }

    pub fn mark_mock_output(&self) -> std::result::Result<(), ContractError> {
        let marker = self.out_folder.join(MOCK_MARKER);
        fs::write(&marker, b"generated by the mock simulator\n")
            .map_err(|e| DispatcherError::from(e).into_ledger_error(&marker))
    }

    /// Append one row and fsync it
    #[instrument(name = "ledger_record", skip(self, summary), fields(output = %descriptor.output_name()))]
    pub fn record(
        &self,
        descriptor: &SequenceDescriptor,
        summary: &SequenceSummary,
    ) -> std::result::Result<(), ContractError> {
        self.append(&LedgerRow::new(descriptor, summary))
            .map_err(|e| e.into_ledger_error(&self.metadata_path))?;
        debug!("Ledger row appended");
        Ok(())
    }

    fn append(&self, row: &LedgerRow) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.metadata_path)?;
        let fresh = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(fresh)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| DispatcherError::Io(std::io::Error::new(e.error().kind(), e.to_string())))?;
        file.sync_all()?;
        Ok(())
    }

    /// All recorded rows, file order. Missing file = empty ledger.
    pub fn rows(&self) -> std::result::Result<Vec<LedgerRow>, ContractError> {
        if !self.metadata_path.exists() {
            return Ok(Vec::new());
        }
        let read = || -> Result<Vec<LedgerRow>> {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(DELIMITER)
                .from_path(&self.metadata_path)?;
            Ok(reader.deserialize().collect::<csv::Result<Vec<LedgerRow>>>()?)
        };
        read().map_err(|e| e.into_ledger_error(&self.metadata_path))
    }

    /// Delete `.<name>.*.tmp` leftovers of interrupted archive writes
    pub fn sweep_stale_temporaries(&self) -> usize {
        let entries = match fs::read_dir(&self.out_folder) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cannot list output folder");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(".tmp")) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stale temporary"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale temporary archives");
        }
        removed
    }
}
