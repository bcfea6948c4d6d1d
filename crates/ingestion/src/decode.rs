//! 原始传感器载荷解码
//!
//! 仿真器以字节块交付数据：事件为 13 字节打包记录，LiDAR 为 f32×4 点，
//! 图像为 BGRA。

use contracts::{Event, ImageFrame, LidarPoint, SensorKind};

use crate::error::{IngestionError, Result};

/// 解码打包事件记录 `x:u16 | y:u16 | t:i64 | pol:u8` (小端)
pub fn decode_events(raw: &[u8]) -> Result<Vec<Event>> {
    if raw.len() % Event::PACKED_SIZE != 0 {
        return Err(IngestionError::decode(
            SensorKind::Events,
            format!(
                "{} bytes is not a multiple of the {}-byte event record",
                raw.len(),
                Event::PACKED_SIZE
            ),
        ));
    }

    raw.chunks_exact(Event::PACKED_SIZE)
        .map(|rec| {
            let pol = match rec[12] {
                0 => false,
                1 => true,
                other => {
                    return Err(IngestionError::decode(
                        SensorKind::Events,
                        format!("invalid polarity byte {other}"),
                    ))
                }
            };
            Ok(Event {
                x: u16::from_le_bytes([rec[0], rec[1]]),
                y: u16::from_le_bytes([rec[2], rec[3]]),
                t: i64::from_le_bytes([
                    rec[4], rec[5], rec[6], rec[7], rec[8], rec[9], rec[10], rec[11],
                ]),
                polarity: pol,
            })
        })
        .collect()
}

/// 打包事件 (测试与回放用)
pub fn encode_events(events: &[Event]) -> Vec<u8> {
    let mut out = Vec::with_capacity(events.len() * Event::PACKED_SIZE);
    for e in events {
        out.extend_from_slice(&e.x.to_le_bytes());
        out.extend_from_slice(&e.y.to_le_bytes());
        out.extend_from_slice(&e.t.to_le_bytes());
        out.push(e.polarity as u8);
    }
    out
}

/// 解码 LiDAR 点 (x, y, z, intensity: f32)
pub fn decode_lidar(raw: &[u8]) -> Result<Vec<LidarPoint>> {
    // 字节块不保证 4 字节对齐，用 pod_collect_to_vec 拷贝
    if raw.len() % std::mem::size_of::<LidarPoint>() != 0 {
        return Err(IngestionError::decode(
            SensorKind::Lidar,
            format!("{} bytes is not a whole number of points", raw.len()),
        ));
    }
    Ok(bytemuck::pod_collect_to_vec(raw))
}

/// 检查 BGRA 图像缓冲长度
pub fn check_bgra(kind: SensorKind, width: u32, height: u32, raw: &[u8]) -> Result<()> {
    let expected = ImageFrame::expected_len(width, height);
    if raw.len() != expected {
        return Err(IngestionError::decode(
            kind,
            format!("{width}x{height} BGRA needs {expected} bytes, got {}", raw.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_events_decode_known_record() {
        let mut raw = vec![0u8; 13];
        raw[0..2].copy_from_slice(&640u16.to_le_bytes());
        raw[2..4].copy_from_slice(&360u16.to_le_bytes());
        raw[4..12].copy_from_slice(&(-5i64).to_le_bytes());
        raw[12] = 1;

        let events = decode_events(&raw).unwrap();
        assert_eq!(
            events,
            vec![Event {
                x: 640,
                y: 360,
                t: -5,
                polarity: true
            }]
        );
    }

    #[test]
    fn test_events_random_batch() {
        let mut rng = rand::rng();
        let events: Vec<Event> = (0..100)
            .map(|i| Event {
                x: rng.random_range(0..1280),
                y: rng.random_range(0..720),
                t: 1_000_000 + i,
                polarity: rng.random(),
            })
            .collect();
        assert_eq!(decode_events(&encode_events(&events)).unwrap(), events);
    }

    #[test]
    fn test_events_truncated_and_bad_polarity() {
        assert!(decode_events(&[0u8; 14]).is_err());
        let mut raw = vec![0u8; 13];
        raw[12] = 7;
        let err = decode_events(&raw).unwrap_err();
        assert!(err.to_string().contains("polarity"));
        assert!(decode_events(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_lidar_unaligned_input() {
        let points = [
            LidarPoint {
                x: 1.0,
                y: -2.0,
                z: 0.5,
                intensity: 0.9,
            },
            LidarPoint {
                x: 3.0,
                y: 4.0,
                z: -1.0,
                intensity: 0.1,
            },
        ];
        let mut raw = vec![0u8];
        raw.extend_from_slice(bytemuck::cast_slice(&points));
        assert_eq!(decode_lidar(&raw[1..]).unwrap(), points.to_vec());
        assert!(decode_lidar(&raw[1..30]).is_err());
    }

    #[test]
    fn test_check_bgra() {
        assert!(check_bgra(SensorKind::Rgb, 4, 2, &[0u8; 32]).is_ok());
        assert!(check_bgra(SensorKind::Depth, 4, 2, &[0u8; 31]).is_err());
    }
}
