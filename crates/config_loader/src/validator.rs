//! 配置校验模块
//!
//! 校验规则：
//! - 字段取值范围 (由 `validator` 派生规则完成)
//! - 预热时长不小于 0，录制时长至少一个 tick
//! - 帧屏障超时不小于一个 tick 间隔
//! - LiDAR 视场上界高于下界，Pandora 布局需要至少 8 线
//! - 地图白名单无重复

use std::collections::HashSet;

use contracts::{ContractError, GenerationConfig};
use validator::{Validate, ValidationErrors};

/// 校验 GenerationConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &GenerationConfig) -> Result<(), ContractError> {
    config.validate().map_err(field_error)?;
    validate_timing(config)?;
    validate_lidar(config)?;
    validate_maps(config)?;
    Ok(())
}

/// 把派生校验的嵌套错误展开成 `a.b.c` 路径
fn field_error(errors: ValidationErrors) -> ContractError {
    let mut path = Vec::new();
    let mut current = &errors;
    loop {
        let Some((field, kind)) = current.errors().iter().next() else {
            break;
        };
        path.push(field.to_string());
        match kind {
            validator::ValidationErrorsKind::Struct(inner) => current = inner.as_ref(),
            validator::ValidationErrorsKind::Field(list) => {
                let detail = list
                    .first()
                    .map(|e| e.code.to_string())
                    .unwrap_or_else(|| "invalid".to_string());
                return ContractError::config_validation(path.join("."), format!("{detail} check failed"));
            }
            validator::ValidationErrorsKind::List(_) => break,
        }
    }
    ContractError::config_validation(path.join("."), errors.to_string())
}

/// 校验时序参数
fn validate_timing(config: &GenerationConfig) -> Result<(), ContractError> {
    let sim = &config.simulation;

    if sim.recorded_ticks() == 0 {
        return Err(ContractError::config_validation(
            "simulation.duration_secs",
            format!(
                "duration {}s records no tick at {} Hz",
                sim.duration_secs, sim.tick_hz
            ),
        ));
    }

    if sim.barrier_timeout_secs < sim.tick_interval() {
        return Err(ContractError::config_validation(
            "simulation.barrier_timeout_secs",
            format!(
                "barrier timeout ({}s) must be >= tick interval ({}s)",
                sim.barrier_timeout_secs,
                sim.tick_interval()
            ),
        ));
    }

    Ok(())
}

/// 校验 LiDAR 几何
fn validate_lidar(config: &GenerationConfig) -> Result<(), ContractError> {
    let lidar = &config.rig.lidar;

    if lidar.upper_fov_deg <= lidar.lower_fov_deg {
        return Err(ContractError::config_validation(
            "rig.lidar.upper_fov_deg / rig.lidar.lower_fov_deg",
            format!(
                "upper_fov ({}) must be > lower_fov ({})",
                lidar.upper_fov_deg, lidar.lower_fov_deg
            ),
        ));
    }

    if lidar.lower_fov_deg >= 0.0 {
        return Err(ContractError::config_validation(
            "rig.lidar.lower_fov_deg",
            "lower_fov must point below the horizon",
        ));
    }

    if lidar.pandora && lidar.channels < 8 {
        return Err(ContractError::config_validation(
            "rig.lidar.channels",
            format!("pandora layout needs at least 8 channels, got {}", lidar.channels),
        ));
    }

    Ok(())
}

/// 校验地图白名单
fn validate_maps(config: &GenerationConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for map in &config.simulation.allowed_maps {
        if map.trim().is_empty() {
            return Err(ContractError::config_validation(
                "simulation.allowed_maps",
                "map name cannot be empty",
            ));
        }
        if !seen.insert(map) {
            return Err(ContractError::config_validation(
                format!("simulation.allowed_maps[{map}]"),
                "duplicate map",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate(&GenerationConfig::default()).is_ok());
    }

    #[test]
    fn test_range_error_names_field_path() {
        let mut config = GenerationConfig::default();
        config.rig.rgb.width = 0;
        let err = validate(&config).unwrap_err();
        match err {
            ContractError::ConfigValidation { field, .. } => {
                assert_eq!(field, "rig.rgb.width");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duration_shorter_than_tick() {
        let mut config = GenerationConfig::default();
        config.simulation.duration_secs = 0.01;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("records no tick"), "got: {err}");
    }

    #[test]
    fn test_barrier_timeout_below_tick() {
        let mut config = GenerationConfig::default();
        config.simulation.barrier_timeout_secs = 0.01;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("barrier timeout"), "got: {err}");
    }

    #[test]
    fn test_inverted_lidar_fov() {
        let mut config = GenerationConfig::default();
        config.rig.lidar.upper_fov_deg = -20.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("upper_fov"), "got: {err}");
    }

    #[test]
    fn test_pandora_channel_floor() {
        let mut config = GenerationConfig::default();
        config.rig.lidar.pandora = true;
        config.rig.lidar.channels = 4;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("pandora"), "got: {err}");
    }

    #[test]
    fn test_duplicate_map() {
        let mut config = GenerationConfig::default();
        config.simulation.allowed_maps.push("Town01".into());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate map"), "got: {err}");
    }
}
