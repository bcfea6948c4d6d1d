//! Sequence - 单个序列的描述与容器
//!
//! `SequenceDescriptor` 由种子表的一行确定性派生；`Sequence` 在录制期间
//! 只能通过采集器追加，冻结后交给归档写入器。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ContractError, DepthFrame, EventPacket, ImageFrame, LidarCloud, SensorKind};

/// 帧时间戳间隔的容差 (秒)
pub const TIMESTAMP_TOLERANCE: f64 = 1e-6;

/// 天气参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSpec {
    /// 太阳高度角 (度)，[-90, 90]
    pub sun_altitude_deg: f32,
    /// 云量，[0, 100]
    pub cloudiness: f32,
}

impl Default for WeatherSpec {
    fn default() -> Self {
        Self {
            sun_altitude_deg: 90.0,
            cloudiness: 0.0,
        }
    }
}

impl WeatherSpec {
    /// 从种子确定性派生天气 (种子表未给出天气列时使用)
    pub fn from_seed(seed: u64) -> Self {
        let h = mix(seed);
        let sun = (h & 0xffff) as f32 / 65_535.0;
        let cloud = ((h >> 16) & 0xffff) as f32 / 65_535.0;
        Self {
            // 保持白天，避免全黑帧
            sun_altitude_deg: 10.0 + sun * 80.0,
            cloudiness: cloud * 100.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.sun_altitude_deg) && (0.0..=100.0).contains(&self.cloudiness)
    }
}

fn mix(seed: u64) -> u64 {
    // splitmix64 finalizer
    let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// 一个序列的不可变描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    pub seed: u64,
    pub map_name: String,
    pub weather: WeatherSpec,
    /// 归档输出路径 `{outfolder}/{map}_{seed}.npz`
    pub output_path: PathBuf,
}

impl SequenceDescriptor {
    pub fn new(seed: u64, map_name: impl Into<String>, weather: WeatherSpec, out_folder: &Path) -> Self {
        let map_name = map_name.into();
        let output_path = out_folder.join(format!("{}.npz", Self::output_stem(&map_name, seed)));
        Self {
            seed,
            map_name,
            weather,
            output_path,
        }
    }

    pub fn output_stem(map_name: &str, seed: u64) -> String {
        format!("{map_name}_{seed}")
    }

    /// 归档文件名 (不含目录)
    pub fn output_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.npz", Self::output_stem(&self.map_name, self.seed)))
    }
}

/// 单个序列的四路数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    pub events: Vec<EventPacket>,
    pub lidar: Vec<LidarCloud>,
    pub rgb: Vec<ImageFrame>,
    pub depth: Vec<DepthFrame>,
}

/// 序列统计摘要 (写入元数据表)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSummary {
    pub ticks: u64,
    pub event_packets: u64,
    pub events: u64,
    pub lidar_clouds: u64,
    pub lidar_points: u64,
    pub rgb_frames: u64,
    pub depth_frames: u64,
}

impl Sequence {
    pub fn summary(&self) -> SequenceSummary {
        SequenceSummary {
            ticks: self.lidar.len() as u64,
            event_packets: self.events.len() as u64,
            events: self.events.iter().map(|p| p.events.len() as u64).sum(),
            lidar_clouds: self.lidar.len() as u64,
            lidar_points: self.lidar.iter().map(|c| c.points.len() as u64).sum(),
            rgb_frames: self.rgb.len() as u64,
            depth_frames: self.depth.len() as u64,
        }
    }

    /// 每路帧流的时间戳序列
    pub fn frame_times(&self, kind: SensorKind) -> Vec<f64> {
        match kind {
            SensorKind::Events => self.events.iter().map(|p| p.production_time).collect(),
            SensorKind::Lidar => self.lidar.iter().map(|c| c.production_time).collect(),
            SensorKind::Rgb => self.rgb.iter().map(|f| f.production_time).collect(),
            SensorKind::Depth => self.depth.iter().map(|f| f.production_time).collect(),
        }
    }

    /// 校验冻结后的序列
    ///
    /// - 三路帧流各有恰好 `expected_ticks` 个样本
    /// - 帧流时间戳严格递增，间隔为 `tick_interval`
    /// - 事件包时间戳单调不减
    pub fn validate(&self, expected_ticks: u64, tick_interval: f64) -> Result<(), ContractError> {
        for kind in SensorKind::FRAME_SENSORS {
            let times = self.frame_times(kind);
            if times.len() as u64 != expected_ticks {
                return Err(ContractError::frame_desync(
                    kind,
                    times.len() as u64,
                    format!("expected {expected_ticks} samples, got {}", times.len()),
                ));
            }
            for (i, pair) in times.windows(2).enumerate() {
                let step = pair[1] - pair[0];
                if step <= 0.0 {
                    return Err(ContractError::frame_desync(
                        kind,
                        i as u64 + 1,
                        format!("timestamp {} not after {}", pair[1], pair[0]),
                    ));
                }
                if (step - tick_interval).abs() > TIMESTAMP_TOLERANCE {
                    return Err(ContractError::frame_desync(
                        kind,
                        i as u64 + 1,
                        format!("step {step:.9}s differs from tick interval {tick_interval}s"),
                    ));
                }
            }
        }

        let event_times = self.frame_times(SensorKind::Events);
        if let Some(i) = event_times.windows(2).position(|w| w[1] < w[0]) {
            return Err(ContractError::frame_desync(
                SensorKind::Events,
                i as u64 + 1,
                "event packet timestamps go backwards",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(t: f64) -> ImageFrame {
        ImageFrame {
            width: 1,
            height: 1,
            pixels: Bytes::from_static(&[0, 0, 0, 255]),
            production_time: t,
        }
    }

    fn sequence(ticks: usize, dt: f64) -> Sequence {
        let times: Vec<f64> = (1..=ticks).map(|i| i as f64 * dt).collect();
        Sequence {
            events: vec![
                EventPacket {
                    events: vec![],
                    production_time: dt * 0.5,
                },
                EventPacket {
                    events: vec![],
                    production_time: dt * 0.5,
                },
            ],
            lidar: times
                .iter()
                .map(|&t| LidarCloud {
                    points: vec![],
                    production_time: t,
                })
                .collect(),
            rgb: times.iter().map(|&t| frame(t)).collect(),
            depth: times.iter().map(|&t| frame(t)).collect(),
        }
    }

    #[test]
    fn test_descriptor_output_path() {
        let d = SequenceDescriptor::new(42, "Town03", WeatherSpec::default(), Path::new("/data/out"));
        assert_eq!(d.output_path, PathBuf::from("/data/out/Town03_42.npz"));
        assert_eq!(d.output_name(), "Town03_42.npz");
    }

    #[test]
    fn test_weather_from_seed_is_deterministic_and_valid() {
        for seed in [0, 1, 42, u64::MAX] {
            let a = WeatherSpec::from_seed(seed);
            assert_eq!(a, WeatherSpec::from_seed(seed));
            assert!(a.is_valid(), "{a:?}");
        }
        assert_ne!(WeatherSpec::from_seed(1), WeatherSpec::from_seed(2));
    }

    #[test]
    fn test_validate_ok() {
        let seq = sequence(5, 0.05);
        assert!(seq.validate(5, 0.05).is_ok());
        let s = seq.summary();
        assert_eq!(s.ticks, 5);
        assert_eq!(s.event_packets, 2);
        assert_eq!(s.rgb_frames, 5);
    }

    #[test]
    fn test_validate_count_mismatch() {
        let mut seq = sequence(5, 0.05);
        seq.depth.pop();
        let err = seq.validate(5, 0.05).unwrap_err();
        assert!(matches!(
            err,
            ContractError::FrameDesync {
                sensor: SensorKind::Depth,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_timestamp() {
        let mut seq = sequence(3, 0.05);
        seq.rgb[2].production_time = seq.rgb[1].production_time;
        assert!(seq.validate(3, 0.05).is_err());
    }

    #[test]
    fn test_validate_rejects_skipped_tick() {
        let mut seq = sequence(3, 0.05);
        seq.lidar[2].production_time += 0.05;
        assert!(seq.validate(3, 0.05).is_err());
    }

    #[test]
    fn test_validate_rejects_backwards_events() {
        let mut seq = sequence(3, 0.05);
        seq.events[1].production_time = 0.0;
        assert!(seq.validate(3, 0.05).is_err());
    }
}
