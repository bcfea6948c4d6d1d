//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON generation config files
//! - Validate configuration legality
//! - Turn a seed table into an ordered `SequencePlan`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::{ConfigLoader, SequencePlan};
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("generation.toml")).unwrap();
//! let plan = SequencePlan::from_path(
//!     Path::new("seeds.csv"),
//!     Path::new("data"),
//!     &config.simulation.allowed_maps,
//! )
//! .unwrap();
//! println!("{} sequences planned", plan.len());
//! ```

mod parser;
mod seed_table;
mod validator;

pub use contracts::GenerationConfig;
pub use parser::ConfigFormat;
pub use seed_table::SequencePlan;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<GenerationConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<GenerationConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already-built config (defaults plus CLI overrides)
    pub fn validate(config: &GenerationConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize GenerationConfig to TOML string
    pub fn to_toml(config: &GenerationConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize GenerationConfig to JSON string
    pub fn to_json(config: &GenerationConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<GenerationConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}
