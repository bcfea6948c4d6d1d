//! GenerationConfig - Config Loader 输出
//!
//! 描述一次数据集生成任务的全部参数：仿真器连接、仿真节拍、传感器装配、归档压缩。
//! 所有字段都有默认值，空配置文件即可运行。

use serde::{Deserialize, Serialize};
use validator::Validate;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的生成配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GenerationConfig {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    #[validate(nested)]
    pub simulator: SimulatorConfig,

    #[serde(default)]
    #[validate(nested)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    #[validate(nested)]
    pub rig: RigConfig,

    #[serde(default)]
    #[validate(nested)]
    pub archive: ArchiveConfig,
}

/// 仿真器连接
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulatorConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1))]
    pub port: u16,

    /// Traffic manager 端口
    #[validate(range(min = 1))]
    pub traffic_manager_port: u16,

    /// 连接超时 (秒)
    #[validate(range(min = 0.1, max = 600.0))]
    pub connect_timeout_secs: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2000,
            traffic_manager_port: 8000,
            connect_timeout_secs: 20.0,
        }
    }
}

/// 仿真节拍与场景
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    /// 固定步长频率 (Hz)，每个 tick 每个帧传感器恰好一帧
    #[validate(range(min = 1.0, max = 1000.0))]
    pub tick_hz: f64,

    /// 录制时长 (秒)
    #[validate(range(min = 0.001))]
    pub duration_secs: f64,

    /// 录制前丢弃的预热时长 (秒)
    #[validate(range(min = 0.0))]
    pub warmup_secs: f64,

    /// 单个 tick 等待帧屏障的上限 (秒)
    #[validate(range(min = 0.001))]
    pub barrier_timeout_secs: f64,

    /// AI 车辆数
    #[validate(range(max = 1000))]
    pub vehicles: u32,

    /// 行人数
    #[validate(range(max = 1000))]
    pub pedestrians: u32,

    /// 自车是否开启自动驾驶
    pub autopilot: bool,

    /// 每个 tick 把自车面前的红灯切为绿灯
    pub release_red_lights: bool,

    /// 允许的地图，空列表表示不限制
    pub allowed_maps: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: 20.0,
            duration_secs: 10.0,
            warmup_secs: 3.0,
            barrier_timeout_secs: 10.0,
            vehicles: 50,
            pedestrians: 50,
            autopilot: true,
            release_red_lights: true,
            allowed_maps: default_maps(),
        }
    }
}

/// 仿真器自带的城镇地图
pub fn default_maps() -> Vec<String> {
    [
        "Town01", "Town02", "Town03", "Town04", "Town05", "Town06", "Town07", "Town10HD",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

impl SimulationConfig {
    /// 固定步长 (秒)
    pub fn tick_interval(&self) -> f64 {
        1.0 / self.tick_hz
    }

    /// 录制 tick 数 N
    pub fn recorded_ticks(&self) -> u64 {
        (self.duration_secs * self.tick_hz).round() as u64
    }

    pub fn warmup_ticks(&self) -> u64 {
        (self.warmup_secs * self.tick_hz).round() as u64
    }

    pub fn barrier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.barrier_timeout_secs)
    }

    pub fn is_map_allowed(&self, map: &str) -> bool {
        self.allowed_maps.is_empty() || self.allowed_maps.iter().any(|m| m == map)
    }
}

/// 传感器装配
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RigConfig {
    #[validate(nested)]
    pub event_camera: EventCameraConfig,

    #[validate(nested)]
    pub lidar: LidarConfig,

    #[validate(nested)]
    pub rgb: CameraConfig,

    #[validate(nested)]
    pub depth: CameraConfig,
}

/// 针孔相机
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CameraConfig {
    #[validate(range(min = 1, max = 8192))]
    pub width: u32,

    #[validate(range(min = 1, max = 8192))]
    pub height: u32,

    /// 水平视场角 (度)
    #[validate(range(min = 1.0, max = 179.0))]
    pub fov_deg: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov_deg: 90.0,
        }
    }
}

/// 事件相机
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventCameraConfig {
    #[validate(range(min = 1, max = 8192))]
    pub width: u32,

    #[validate(range(min = 1, max = 8192))]
    pub height: u32,

    #[validate(range(min = 1.0, max = 179.0))]
    pub fov_deg: f32,

    #[validate(range(min = 0.0))]
    pub positive_threshold: f32,

    #[validate(range(min = 0.0))]
    pub negative_threshold: f32,

    pub gamma: f32,

    /// 是否在对数强度上检测事件
    pub use_log: bool,
}

impl Default for EventCameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov_deg: 90.0,
            positive_threshold: 10.0,
            negative_threshold: 10.0,
            gamma: 2.2,
            use_log: false,
        }
    }
}

/// LiDAR
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LidarConfig {
    #[validate(range(min = 1, max = 256))]
    pub channels: u32,

    /// 每个 tick (一圈) 的点数
    #[validate(range(min = 1))]
    pub points_per_cloud: u32,

    /// 量程 (米)
    #[validate(range(min = 1.0))]
    pub range_m: f32,

    pub upper_fov_deg: f32,

    pub lower_fov_deg: f32,

    /// 使用三段式 Pandora 布局 (三个子 LiDAR 合并为一帧)
    pub pandora: bool,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            channels: 40,
            points_per_cloud: 70_000,
            range_m: 200.0,
            upper_fov_deg: 7.0,
            lower_fov_deg: -16.0,
            pandora: false,
        }
    }
}

impl LidarConfig {
    /// 子单元数量
    pub fn units(&self) -> u8 {
        if self.pandora {
            3
        } else {
            1
        }
    }
}

/// 归档输出
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Deflate 压缩等级，偏低以换取吞吐
    #[validate(range(max = 9))]
    pub compression_level: u8,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GenerationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.recorded_ticks(), 200);
        assert_eq!(config.simulation.warmup_ticks(), 60);
        assert!((config.simulation.tick_interval() - 0.05).abs() < 1e-12);
        assert_eq!(config.simulator.port, 2000);
    }

    #[test]
    fn test_out_of_range_fails() {
        let mut config = GenerationConfig::default();
        config.archive.compression_level = 12;
        assert!(config.validate().is_err());

        let mut config = GenerationConfig::default();
        config.simulation.tick_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GenerationConfig = toml::from_str(
            r#"
[simulation]
tick_hz = 10.0
duration_secs = 2.0

[rig.lidar]
pandora = true
"#,
        )
        .unwrap();
        assert_eq!(config.simulation.recorded_ticks(), 20);
        assert_eq!(config.simulation.vehicles, 50);
        assert_eq!(config.rig.lidar.units(), 3);
        assert_eq!(config.rig.rgb.width, 1280);
    }

    #[test]
    fn test_map_allow_list() {
        let mut sim = SimulationConfig::default();
        assert!(sim.is_map_allowed("Town10HD"));
        assert!(!sim.is_map_allowed("Town99"));
        sim.allowed_maps.clear();
        assert!(sim.is_map_allowed("Town99"));
    }
}
