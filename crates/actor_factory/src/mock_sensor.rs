//! Mock sensor implementation
//!
//! Implements `SensorSource` for the mock simulator. Each listening sensor owns
//! a background thread that receives world ticks over a channel and answers
//! them the way the real simulator does: frame sensors deliver one reading per
//! tick stamped with the simulation clock, the event camera delivers a
//! variable number of packets (possibly none).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use contracts::{
    encode_depth, Event, EventPacket, ImageFrame, LidarCloud, LidarPoint, SensorDataCallback,
    SensorKind, SensorPayload, SensorReading, SensorSource,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

/// What a sensor should do with one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Deliver,
    /// Deliver nothing (sensor stalls)
    Skip,
    /// Deliver the same frame twice
    Duplicate,
}

/// Tick notification sent from the mock world to every sensor
#[derive(Debug, Clone, Copy)]
pub struct TickMsg {
    pub frame: u64,
    pub elapsed_seconds: f64,
    pub delta_seconds: f64,
    /// Sequence seed (drives deterministic frame content)
    pub seed: u64,
    pub action: TickAction,
}

/// Mock sensor configuration
#[derive(Debug, Clone)]
pub struct MockSensorConfig {
    /// Image width (cameras)
    pub image_width: u32,
    /// Image height (cameras)
    pub image_height: u32,
    /// Points per tick (LiDAR)
    pub lidar_points: u32,
    /// Upper bound of event packets per tick
    pub max_event_packets: u32,
    /// Upper bound of events per packet
    pub max_events_per_packet: u32,
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self {
            image_width: 64,
            image_height: 48,
            lidar_points: 256,
            max_event_packets: 3,
            max_events_per_packet: 64,
        }
    }
}

impl MockSensorConfig {
    /// Read sensor blueprint attributes, falling back to defaults
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| attributes.get(key).and_then(|v| v.parse::<f64>().ok());
        if let Some(w) = get("image_size_x") {
            config.image_width = w as u32;
        }
        if let Some(h) = get("image_size_y") {
            config.image_height = h as u32;
        }
        if let (Some(pps), Some(hz)) = (get("points_per_second"), get("rotation_frequency")) {
            if hz > 0.0 {
                config.lidar_points = (pps / hz).round() as u32;
            }
        }
        config
    }
}

/// Mock sensor
pub struct MockSensor {
    sensor_id: String,
    kind: SensorKind,
    unit: u8,
    config: MockSensorConfig,
    ticks: async_channel::Receiver<TickMsg>,
    listening: Arc<AtomicBool>,
}

impl MockSensor {
    pub fn new(
        sensor_id: String,
        kind: SensorKind,
        unit: u8,
        config: MockSensorConfig,
        ticks: async_channel::Receiver<TickMsg>,
        listening: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sensor_id,
            kind,
            unit,
            config,
            ticks,
            listening,
        }
    }

    /// Build the readings answering one tick
    fn readings(
        config: &MockSensorConfig,
        kind: SensorKind,
        unit: u8,
        msg: &TickMsg,
    ) -> Vec<SensorPayload> {
        match kind {
            SensorKind::Events => Self::event_packets(config, msg)
                .into_iter()
                .map(SensorPayload::Events)
                .collect(),
            SensorKind::Lidar => vec![SensorPayload::Lidar(Self::lidar_cloud(config, unit, msg))],
            SensorKind::Rgb => vec![SensorPayload::Rgb(Self::rgb_frame(config, msg))],
            SensorKind::Depth => vec![SensorPayload::Depth(Self::depth_frame(config, msg))],
        }
    }

    /// Event packets are not reproducible run to run
    fn event_packets(config: &MockSensorConfig, msg: &TickMsg) -> Vec<EventPacket> {
        let mut rng = rand::rng();
        let count = rng.random_range(0..=config.max_event_packets);
        let start = msg.elapsed_seconds - msg.delta_seconds;
        (0..count)
            .map(|i| {
                let production_time =
                    start + msg.delta_seconds * (i + 1) as f64 / count as f64;
                let t_ns = (production_time * 1e9) as i64;
                let n = rng.random_range(0..=config.max_events_per_packet);
                let events = (0..n)
                    .map(|_| Event {
                        x: rng.random_range(0..config.image_width.max(1)) as u16,
                        y: rng.random_range(0..config.image_height.max(1)) as u16,
                        t: t_ns - rng.random_range(0..=(msg.delta_seconds * 1e9) as i64 / 2),
                        polarity: rng.random_bool(0.5),
                    })
                    .collect();
                EventPacket {
                    events,
                    production_time,
                }
            })
            .collect()
    }

    fn frame_rng(msg: &TickMsg, salt: u64) -> StdRng {
        StdRng::seed_from_u64(msg.seed ^ msg.frame.rotate_left(17) ^ salt)
    }

    fn lidar_cloud(config: &MockSensorConfig, unit: u8, msg: &TickMsg) -> LidarCloud {
        let mut rng = Self::frame_rng(msg, 0x11da5 + unit as u64);
        let points = (0..config.lidar_points)
            .map(|_| LidarPoint {
                x: rng.random_range(-50.0..50.0),
                y: rng.random_range(-50.0..50.0),
                z: rng.random_range(-2.5..3.0),
                intensity: rng.random_range(0.0..=1.0),
            })
            .collect();
        LidarCloud {
            points,
            production_time: msg.elapsed_seconds,
        }
    }

    fn rgb_frame(config: &MockSensorConfig, msg: &TickMsg) -> ImageFrame {
        let mut rng = Self::frame_rng(msg, 0x4b6);
        let base: [u8; 3] = [rng.random(), rng.random(), rng.random()];
        let len = ImageFrame::expected_len(config.image_width, config.image_height);
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..(len / 4) {
            pixels.extend_from_slice(&[base[0], base[1], base[2], 255]);
        }
        ImageFrame {
            width: config.image_width,
            height: config.image_height,
            pixels: Bytes::from(pixels),
            production_time: msg.elapsed_seconds,
        }
    }

    /// Depth shrinks toward the bottom rows, like a ground plane seen from the roof
    fn depth_frame(config: &MockSensorConfig, msg: &TickMsg) -> ImageFrame {
        let (w, h) = (config.image_width, config.image_height);
        let mut pixels = Vec::with_capacity(ImageFrame::expected_len(w, h));
        for row in 0..h {
            let depth = 2.0 + (h - row) as f64 * 0.5 + (msg.frame % 10) as f64 * 0.01;
            let px = encode_depth(depth);
            for _ in 0..w {
                pixels.extend_from_slice(&px);
            }
        }
        ImageFrame {
            width: w,
            height: h,
            pixels: Bytes::from(pixels),
            production_time: msg.elapsed_seconds,
        }
    }
}

impl SensorSource for MockSensor {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn sensor_kind(&self) -> SensorKind {
        self.kind
    }

    fn listen(&self, callback: SensorDataCallback) {
        // Idempotent: if already listening, don't start again
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let sensor_id = self.sensor_id.clone();
        let kind = self.kind;
        let unit = self.unit;
        let config = self.config.clone();
        let listening = self.listening.clone();
        let ticks = self.ticks.clone();

        thread::spawn(move || {
            debug!(sensor_id = %sensor_id, kind = %kind, "mock sensor started");

            // Channel closes when the sensor actor is destroyed
            while let Ok(msg) = ticks.recv_blocking() {
                if !listening.load(Ordering::Relaxed) {
                    break;
                }
                let repeats = match msg.action {
                    TickAction::Deliver => 1,
                    TickAction::Skip => 0,
                    TickAction::Duplicate => 2,
                };
                for _ in 0..repeats {
                    for payload in Self::readings(&config, kind, unit, &msg) {
                        callback(SensorReading {
                            frame: msg.frame,
                            unit,
                            payload,
                        });
                    }
                }
                trace!(sensor_id = %sensor_id, frame = msg.frame, "mock tick answered");
            }

            listening.store(false, Ordering::SeqCst);
            debug!(sensor_id = %sensor_id, "mock sensor stopped");
        });
    }

    fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::decode_depth;
    use std::sync::Mutex;
    use std::time::Duration;

    fn msg(frame: u64, action: TickAction) -> TickMsg {
        TickMsg {
            frame,
            elapsed_seconds: frame as f64 * 0.05,
            delta_seconds: 0.05,
            seed: 7,
            action,
        }
    }

    fn collect(kind: SensorKind, msgs: &[TickMsg]) -> Vec<SensorReading> {
        let (tx, rx) = async_channel::unbounded();
        let sensor = MockSensor::new(
            "s".into(),
            kind,
            0,
            MockSensorConfig::default(),
            rx,
            Arc::new(AtomicBool::new(false)),
        );
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = got.clone();
        sensor.listen(Arc::new(move |r| sink.lock().unwrap().push(r)));
        for m in msgs {
            tx.send_blocking(*m).unwrap();
        }
        drop(tx);
        // wait for the thread to drain the channel
        for _ in 0..200 {
            if !sensor.is_listening() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let out = got.lock().unwrap().clone();
        out
    }

    #[test]
    fn test_frame_sensor_one_reading_per_tick() {
        let readings = collect(
            SensorKind::Rgb,
            &[msg(1, TickAction::Deliver), msg(2, TickAction::Deliver)],
        );
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].frame, 2);
        assert!((readings[1].payload.production_time() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_skip_and_duplicate() {
        let readings = collect(
            SensorKind::Lidar,
            &[msg(1, TickAction::Skip), msg(2, TickAction::Duplicate)],
        );
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.frame == 2));
    }

    #[test]
    fn test_event_packets_stay_inside_tick() {
        let readings = collect(SensorKind::Events, &[msg(4, TickAction::Deliver)]);
        assert!(readings.len() <= 3);
        let mut last = 0.15;
        for r in readings {
            let t = r.payload.production_time();
            assert!(t > 0.15 && t <= 0.2 + 1e-12);
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn test_depth_frame_decodes() {
        let config = MockSensorConfig::default();
        let frame = MockSensor::depth_frame(&config, &msg(3, TickAction::Deliver));
        let top = decode_depth(frame.bgra_at(0, 0).unwrap());
        let bottom = decode_depth(frame.bgra_at(config.image_height - 1, 0).unwrap());
        assert!(top > bottom);
        assert!(bottom >= 2.0);
    }

    #[test]
    fn test_config_from_attributes() {
        let attrs: HashMap<String, String> = [
            ("image_size_x", "32"),
            ("image_size_y", "16"),
            ("points_per_second", "2000"),
            ("rotation_frequency", "20"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = MockSensorConfig::from_attributes(&attrs);
        assert_eq!(config.image_width, 32);
        assert_eq!(config.image_height, 16);
        assert_eq!(config.lidar_points, 100);
    }

    #[test]
    fn test_idempotent_listen() {
        let (tx, rx) = async_channel::unbounded();
        let sensor = MockSensor::new(
            "d".into(),
            SensorKind::Depth,
            0,
            MockSensorConfig::default(),
            rx,
            Arc::new(AtomicBool::new(false)),
        );
        let count = Arc::new(Mutex::new(0u32));
        let c1 = count.clone();
        let c2 = count.clone();
        sensor.listen(Arc::new(move |_| *c1.lock().unwrap() += 1));
        sensor.listen(Arc::new(move |_| *c2.lock().unwrap() += 100));
        tx.send_blocking(msg(1, TickAction::Deliver)).unwrap();
        drop(tx);
        for _ in 0..200 {
            if !sensor.is_listening() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
