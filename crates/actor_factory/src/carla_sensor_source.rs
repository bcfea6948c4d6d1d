//! CARLA Sensor SensorSource wrapper
//!
//! Only compiled when the `real-carla` feature is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use carla::client::Sensor;
use contracts::{SensorDataCallback, SensorKind, SensorSource};
use tracing::{debug, trace, warn};

use crate::sensor_data_converter::convert_sensor_data;

/// Wraps a native CARLA `Sensor` so the collector handles real and mock
/// sensors uniformly.
pub struct CarlaSensorSource {
    sensor_id: String,
    kind: SensorKind,
    unit: u8,
    sensor: Sensor,
    listening: Arc<AtomicBool>,
}

impl CarlaSensorSource {
    pub fn new(sensor_id: String, kind: SensorKind, unit: u8, sensor: Sensor) -> Self {
        Self {
            sensor_id,
            kind,
            unit,
            sensor,
            listening: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SensorSource for CarlaSensorSource {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn sensor_kind(&self) -> SensorKind {
        self.kind
    }

    fn listen(&self, callback: SensorDataCallback) {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!(sensor_id = %self.sensor_id, "sensor already listening");
            return;
        }

        let sensor_id = self.sensor_id.clone();
        let kind = self.kind;
        let unit = self.unit;
        let listening = self.listening.clone();

        debug!(sensor_id = %sensor_id, %kind, "starting CARLA sensor");

        self.sensor.listen(move |sensor_data| {
            if !listening.load(Ordering::Relaxed) {
                return;
            }
            match convert_sensor_data(kind, unit, &sensor_data) {
                Some(reading) => callback(reading),
                None => trace!(sensor_id = %sensor_id, "failed to convert sensor data"),
            }
        });
    }

    fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            debug!(sensor_id = %self.sensor_id, "stopping CARLA sensor");
            self.sensor.stop();
        }
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}
