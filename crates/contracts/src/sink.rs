//! SequenceSink trait - archive output interface

use std::path::PathBuf;

use crate::{ContractError, Sequence, SequenceDescriptor, SequenceSummary};

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    /// Final archive path (already atomically in place)
    pub path: PathBuf,
    /// Archive size on disk
    pub bytes: u64,
    pub sequence: SequenceSummary,
}

/// Sequence output trait
///
/// A publish either makes the complete archive visible at
/// `descriptor.output_path` or leaves nothing behind.
#[trait_variant::make(SequenceSink: Send)]
pub trait LocalSequenceSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Serialize and publish a frozen sequence
    ///
    /// # Errors
    /// `ArchiveWriteFailure` with the target path; no partial file remains.
    async fn publish(
        &self,
        sequence: Sequence,
        descriptor: &SequenceDescriptor,
    ) -> Result<ArchiveSummary, ContractError>;
}
