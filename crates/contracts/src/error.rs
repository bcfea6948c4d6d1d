//! Layered error definitions
//!
//! Categorized by source: config / seed table / simulator / capture / archive / ledger

use thiserror::Error;

use crate::SensorKind;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// A seed table row that cannot become a sequence (row is skipped)
    #[error("malformed seed row at line {line}: {message}")]
    MalformedSeedRow { line: u64, message: String },

    // ===== Simulator Errors =====
    /// Simulator unreachable or the connection dropped mid-run
    #[error("simulator connection lost: {message}")]
    SimulatorConnectionLost { message: String },

    /// Actor spawn failure (vehicle, sensor or traffic)
    #[error("spawn failed for '{actor}': {message}")]
    SpawnFailed { actor: String, message: String },

    // ===== Capture Errors =====
    /// Frame barrier not satisfied in time
    #[error("simulation timeout at tick {tick}: waited {waited_ms}ms for sensors: {missing:?}")]
    SimulationTimeout {
        tick: u64,
        waited_ms: u64,
        missing: Vec<SensorKind>,
    },

    /// A frame stream broke the one-sample-per-tick contract
    #[error("frame desync on {sensor} at tick {tick}: {message}")]
    FrameDesync {
        sensor: SensorKind,
        tick: u64,
        message: String,
    },

    /// Raw sensor payload could not be decoded
    #[error("payload decode error for {sensor}: {message}")]
    PayloadDecode { sensor: SensorKind, message: String },

    // ===== Output Errors =====
    /// Archive serialization or publish failed; nothing was published
    #[error("archive write failure for '{path}': {message}")]
    ArchiveWriteFailure { path: String, message: String },

    /// Completion ledger append failed
    #[error("ledger write failure for '{path}': {message}")]
    LedgerWrite { path: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Job was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn malformed_row(line: u64, message: impl Into<String>) -> Self {
        Self::MalformedSeedRow {
            line,
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::SimulatorConnectionLost {
            message: message.into(),
        }
    }

    pub fn spawn_failed(actor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            actor: actor.into(),
            message: message.into(),
        }
    }

    pub fn frame_desync(sensor: SensorKind, tick: u64, message: impl Into<String>) -> Self {
        Self::FrameDesync {
            sensor,
            tick,
            message: message.into(),
        }
    }

    pub fn payload_decode(sensor: SensorKind, message: impl Into<String>) -> Self {
        Self::PayloadDecode {
            sensor,
            message: message.into(),
        }
    }

    /// Create archive write error
    pub fn archive_write(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArchiveWriteFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn ledger_write(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LedgerWrite {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors that abort a single sequence and leave it eligible for a later run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SimulatorConnectionLost { .. }
                | Self::SimulationTimeout { .. }
                | Self::FrameDesync { .. }
                | Self::PayloadDecode { .. }
                | Self::SpawnFailed { .. }
                | Self::ArchiveWriteFailure { .. }
        )
    }

    /// Short machine-friendly label, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "config_parse",
            Self::ConfigValidation { .. } => "config_validation",
            Self::MalformedSeedRow { .. } => "malformed_seed_row",
            Self::SimulatorConnectionLost { .. } => "connection_lost",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::SimulationTimeout { .. } => "timeout",
            Self::FrameDesync { .. } => "frame_desync",
            Self::PayloadDecode { .. } => "payload_decode",
            Self::ArchiveWriteFailure { .. } => "archive_write",
            Self::LedgerWrite { .. } => "ledger_write",
            Self::Io(_) => "io",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }
}
