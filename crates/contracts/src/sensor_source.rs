//! SensorSource trait - Sensor data source abstraction
//!
//! Decouples the capture side from concrete sensors: real simulator sensors
//! and mock sensors deliver readings through the same callback interface.

use std::sync::Arc;

use crate::{SensorKind, SensorReading};

/// Sensor data callback type
///
/// Invoked on a sensor-owned thread, concurrently with the tick loop.
pub type SensorDataCallback = Arc<dyn Fn(SensorReading) + Send + Sync>;

/// Sensor data source trait
///
/// # Example
///
/// ```ignore
/// let sensor: Box<dyn SensorSource> = client.get_sensor_source(actor_id)?;
/// sensor.listen(collector.callback(sensor.sensor_kind()));
/// // ... tick the world ...
/// sensor.stop();
/// ```
pub trait SensorSource: Send + Sync {
    /// Rig-local sensor name, e.g. `lidar.1`
    fn sensor_id(&self) -> &str;

    fn sensor_kind(&self) -> SensorKind;

    /// Register data callback
    ///
    /// Repeated calls while listening are idempotent (no second callback).
    fn listen(&self, callback: SensorDataCallback);

    /// Stop listening. Readings already in flight may still be delivered.
    fn stop(&self);

    fn is_listening(&self) -> bool;
}
