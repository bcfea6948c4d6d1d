//! 传感器记录
//!
//! 四类传感器的固定结构记录：事件相机、LiDAR、RGB、深度。
//! 每条记录都带有仿真器时钟下的 production_time (秒)。

use std::fmt;

use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 传感器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// 事件相机 (异步、变速率)
    Events,
    /// LiDAR (每 tick 一帧)
    Lidar,
    /// RGB 相机 (每 tick 一帧)
    Rgb,
    /// 深度相机 (每 tick 一帧)
    Depth,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [Self::Events, Self::Lidar, Self::Rgb, Self::Depth];

    /// 参与帧屏障的传感器
    pub const FRAME_SENSORS: [SensorKind; 3] = [Self::Lidar, Self::Rgb, Self::Depth];

    /// 是否为定频帧传感器 (事件流永远不参与屏障)
    pub fn is_frame_sensor(self) -> bool {
        !matches!(self, Self::Events)
    }

    /// 归档文件中的条目名
    pub fn archive_entry(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Lidar => "lidar_clouds",
            Self::Rgb => "rgb_images",
            Self::Depth => "depth_images",
        }
    }

    /// 仿真器蓝图名
    pub fn blueprint(self) -> &'static str {
        match self {
            Self::Events => "sensor.camera.dvs",
            Self::Lidar => "sensor.lidar.ray_cast",
            Self::Rgb => "sensor.camera.rgb",
            Self::Depth => "sensor.camera.depth",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Events => "events",
            Self::Lidar => "lidar",
            Self::Rgb => "rgb",
            Self::Depth => "depth",
        })
    }
}

/// 单个 DVS 事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub x: u16,
    pub y: u16,
    /// 仿真时间 (ns)
    pub t: i64,
    pub polarity: bool,
}

impl Event {
    /// 打包后的线格式长度: x:u16 | y:u16 | t:i64 | pol:u8
    pub const PACKED_SIZE: usize = 13;
}

/// 一次回调交付的事件批次，可以为空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
    pub events: Vec<Event>,
    pub production_time: f64,
}

/// LiDAR 点 (x, y, z, intensity)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// [0, 1]
    pub intensity: f32,
}

/// 一个 tick 的完整点云
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarCloud {
    pub points: Vec<LidarPoint>,
    pub production_time: f64,
}

/// H×W×4 BGRA 图像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    /// 行主序 BGRA 像素 (零拷贝)
    pub pixels: Bytes,
    pub production_time: f64,
}

impl ImageFrame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// 像素 (row, col) 的 BGRA 四元组
    pub fn bgra_at(&self, row: u32, col: u32) -> Option<[u8; 4]> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let offset = (row as usize * self.width as usize + col as usize) * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// 深度帧：像素按深度编码写入 B/G/R 通道
pub type DepthFrame = ImageFrame;

/// 传感器回调交付的一条读数
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// 仿真器帧号
    pub frame: u64,
    /// 产生该读数的子单元 (多线 LiDAR 组内序号，其余传感器为 0)
    pub unit: u8,
    pub payload: SensorPayload,
}

/// 读数载荷
#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    Events(EventPacket),
    Lidar(LidarCloud),
    Rgb(ImageFrame),
    Depth(DepthFrame),
}

impl SensorPayload {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::Events(_) => SensorKind::Events,
            Self::Lidar(_) => SensorKind::Lidar,
            Self::Rgb(_) => SensorKind::Rgb,
            Self::Depth(_) => SensorKind::Depth,
        }
    }

    pub fn production_time(&self) -> f64 {
        match self {
            Self::Events(p) => p.production_time,
            Self::Lidar(c) => c.production_time,
            Self::Rgb(f) | Self::Depth(f) => f.production_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_events_skip_barrier() {
        assert!(!SensorKind::Events.is_frame_sensor());
        for kind in SensorKind::FRAME_SENSORS {
            assert!(kind.is_frame_sensor());
        }
    }

    #[test]
    fn test_archive_entries() {
        let names: Vec<_> = SensorKind::ALL.iter().map(|k| k.archive_entry()).collect();
        assert_eq!(
            names,
            ["events", "lidar_clouds", "rgb_images", "depth_images"]
        );
    }

    #[test]
    fn test_lidar_point_is_16_bytes() {
        assert_eq!(std::mem::size_of::<LidarPoint>(), 16);
        let p = LidarPoint {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            intensity: 0.5,
        };
        let raw: &[u8] = bytemuck::bytes_of(&p);
        assert_eq!(&raw[0..4], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn test_bgra_at() {
        let frame = ImageFrame {
            width: 2,
            height: 1,
            pixels: Bytes::from_static(&[1, 2, 3, 255, 4, 5, 6, 255]),
            production_time: 0.05,
        };
        assert_eq!(frame.bgra_at(0, 1), Some([4, 5, 6, 255]));
        assert_eq!(frame.bgra_at(1, 0), None);
        assert_eq!(ImageFrame::expected_len(1280, 720), 1280 * 720 * 4);
    }
}
