//! `validate` command implementation.

use anyhow::{Context, Result};
use config_loader::SequencePlan;
use contracts::GenerationConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::load_config;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seeds: Option<SeedTableSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    simulator: String,
    tick_hz: f64,
    recorded_ticks: u64,
    warmup_ticks: u64,
    vehicles: u32,
    pedestrians: u32,
    lidar_units: u8,
    compression_level: u8,
}

#[derive(Serialize)]
struct SeedTableSummary {
    path: String,
    sequences: usize,
    rejected: Vec<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    let config_path = args
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<built-in defaults>".to_string());
    info!(config = %config_path, "Validating configuration");

    let result = validate(args, config_path);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Validation failed")
    }
}

fn validate(args: &ValidateArgs, config_path: String) -> ValidationResult {
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            return ValidationResult {
                valid: false,
                config_path,
                error: Some(format!("{e:#}")),
                warnings: Vec::new(),
                summary: None,
                seeds: None,
            }
        }
    };

    let mut result = ValidationResult {
        valid: true,
        config_path,
        error: None,
        warnings: collect_warnings(&config),
        summary: Some(summarize(&config)),
        seeds: None,
    };

    if let Some(ref seeds) = args.seeds {
        // 输出目录只影响描述符路径，校验时无关
        match SequencePlan::from_path(seeds, std::path::Path::new("."), &config.simulation.allowed_maps) {
            Ok(plan) => {
                if plan.is_empty() {
                    result.warnings.push("Seed table has no valid row".to_string());
                }
                result.seeds = Some(SeedTableSummary {
                    path: seeds.display().to_string(),
                    sequences: plan.len(),
                    rejected: plan.rejected().iter().map(|e| e.to_string()).collect(),
                });
            }
            Err(e) => {
                result.valid = false;
                result.error = Some(e.to_string());
            }
        }
    }

    result
}

fn summarize(config: &GenerationConfig) -> ConfigSummary {
    ConfigSummary {
        simulator: format!("{}:{}", config.simulator.host, config.simulator.port),
        tick_hz: config.simulation.tick_hz,
        recorded_ticks: config.simulation.recorded_ticks(),
        warmup_ticks: config.simulation.warmup_ticks(),
        vehicles: config.simulation.vehicles,
        pedestrians: config.simulation.pedestrians,
        lidar_units: config.rig.lidar.units(),
        compression_level: config.archive.compression_level,
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &GenerationConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.simulation.allowed_maps.is_empty() {
        warnings.push("simulation.allowed_maps is empty - any map name is accepted".to_string());
    }
    if config.simulation.warmup_ticks() == 0 {
        warnings.push("No warm-up: the first recorded ticks contain spawn transients".to_string());
    }
    if config.archive.compression_level == 0 {
        warnings.push("archive.compression_level = 0 - archives are stored uncompressed".to_string());
    }
    if config.simulation.barrier_timeout_secs < 2.0 * config.simulation.tick_interval() {
        warnings.push("barrier_timeout_secs is shorter than two ticks".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if !result.valid {
        println!("✗ Validation failed: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
        return;
    }

    println!("✓ Configuration is valid: {}", result.config_path);
    if let Some(ref summary) = result.summary {
        println!("\n  Simulator: {}", summary.simulator);
        println!(
            "  Ticks: {} recorded + {} warm-up at {} Hz",
            summary.recorded_ticks, summary.warmup_ticks, summary.tick_hz
        );
        println!(
            "  Traffic: {} vehicles, {} pedestrians",
            summary.vehicles, summary.pedestrians
        );
        println!("  LiDAR units: {}", summary.lidar_units);
        println!("  Compression level: {}", summary.compression_level);
    }

    if let Some(ref seeds) = result.seeds {
        println!("\n  Seed table {}: {} sequence(s)", seeds.path, seeds.sequences);
        for rejected in &seeds.rejected {
            println!("    - skipped: {}", rejected);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_and_seed_table() {
        let dir = tempdir().unwrap();
        let seeds = dir.path().join("seeds.csv");
        std::fs::write(&seeds, "seed,map\n1,Town01\n2,Town99\n").unwrap();

        let args = ValidateArgs {
            config: None,
            seeds: Some(seeds),
            json: true,
        };
        let result = validate(&args, "defaults".to_string());
        assert!(result.valid);
        let seeds = result.seeds.unwrap();
        assert_eq!(seeds.sequences, 1);
        assert_eq!(seeds.rejected.len(), 1);
    }

    #[test]
    fn test_unusable_seed_header_is_invalid() {
        let dir = tempdir().unwrap();
        let seeds = dir.path().join("seeds.csv");
        std::fs::write(&seeds, "id;town\n1;Town01\n").unwrap();

        let args = ValidateArgs {
            config: None,
            seeds: Some(seeds),
            json: false,
        };
        let result = validate(&args, "defaults".to_string());
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_bad_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("generation.toml");
        std::fs::write(&path, "[simulation]\ntick_hz = 0.0\n").unwrap();

        let args = ValidateArgs {
            config: Some(path),
            seeds: None,
            json: false,
        };
        assert!(!validate(&args, "bad".to_string()).valid);
    }
}
