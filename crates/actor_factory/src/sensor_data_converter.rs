//! CARLA 传感器数据转换
//!
//! 将 CARLA 原生传感器数据转换为 `SensorReading`。
//! 仅在 `real-carla` feature 启用时编译。

use bytes::Bytes;
use carla::sensor::data::{DVSEventArray, Image, LidarMeasurement};
use carla::sensor::{SensorData, SensorDataBase};
use contracts::{
    Event, EventPacket, ImageFrame, LidarCloud, LidarPoint, SensorKind, SensorPayload,
    SensorReading,
};

fn image_frame(image: &Image, production_time: f64) -> ImageFrame {
    ImageFrame {
        width: image.width() as u32,
        height: image.height() as u32,
        pixels: Bytes::copy_from_slice(image.as_raw_bytes()),
        production_time,
    }
}

fn lidar_cloud(lidar: &LidarMeasurement, production_time: f64) -> LidarCloud {
    let points = lidar
        .as_slice()
        .iter()
        .map(|d| LidarPoint {
            x: d.point.x,
            y: d.point.y,
            z: d.point.z,
            intensity: d.intensity,
        })
        .collect();
    LidarCloud {
        points,
        production_time,
    }
}

fn event_packet(array: &DVSEventArray, production_time: f64) -> EventPacket {
    let events = array
        .as_slice()
        .iter()
        .map(|e| Event {
            x: e.x,
            y: e.y,
            t: e.t,
            polarity: e.pol,
        })
        .collect();
    EventPacket {
        events,
        production_time,
    }
}

/// 将 CARLA 传感器数据转换为 SensorReading
///
/// 数据类型与传感器类型不匹配时返回 None。
pub fn convert_sensor_data(kind: SensorKind, unit: u8, data: &SensorData) -> Option<SensorReading> {
    let production_time = data.timestamp();
    let frame = data.frame() as u64;

    let payload = match kind {
        SensorKind::Events => {
            SensorPayload::Events(event_packet(&DVSEventArray::try_from(data.clone()).ok()?, production_time))
        }
        SensorKind::Lidar => SensorPayload::Lidar(lidar_cloud(
            &LidarMeasurement::try_from(data.clone()).ok()?,
            production_time,
        )),
        SensorKind::Rgb => {
            SensorPayload::Rgb(image_frame(&Image::try_from(data.clone()).ok()?, production_time))
        }
        SensorKind::Depth => {
            SensorPayload::Depth(image_frame(&Image::try_from(data.clone()).ok()?, production_time))
        }
    };

    Some(SensorReading {
        frame,
        unit,
        payload,
    })
}
