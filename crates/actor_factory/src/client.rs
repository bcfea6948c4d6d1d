//! Simulator client abstraction
//!
//! Defines the tick-and-callback interface to the driving simulator, with a
//! real implementation (feature `real-carla`) and a mock for tests.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use contracts::{ActorId, SensorKind, SensorSource, Transform, VehicleExtent, WeatherSpec};

use crate::error::Result;

/// World stepping mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    /// Server waits for a client tick before advancing
    pub synchronous: bool,
    /// Fixed simulation step (seconds); `None` for variable step
    pub fixed_delta_seconds: Option<f64>,
}

impl WorldSettings {
    pub fn synchronous(tick_interval: f64) -> Self {
        Self {
            synchronous: true,
            fixed_delta_seconds: Some(tick_interval),
        }
    }

    /// Settings restored after a sequence so a crashed client does not freeze the server
    pub fn asynchronous() -> Self {
        Self {
            synchronous: false,
            fixed_delta_seconds: None,
        }
    }
}

/// Result of one world step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTick {
    /// Simulator frame number
    pub frame: u64,
    /// Simulation clock after the step (seconds)
    pub elapsed_seconds: f64,
}

/// Vehicle blueprint summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleBlueprint {
    pub id: String,
    pub wheels: u32,
}

/// A spawned vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnedVehicle {
    pub actor_id: ActorId,
    pub extent: VehicleExtent,
}

/// Per-tick vehicle state used for traffic light handling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub transform: Transform,
    /// Vehicle is waiting at a red light
    pub at_red_light: bool,
}

/// Simulator client trait
///
/// One instance is one connection. Methods fail with `ConnectionFailed`
/// once the connection is lost.
pub trait SimulatorClient: Send + Sync {
    /// Connect to the simulator server
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Load a map, replacing the current world
    fn load_world(&self, map: &str) -> impl Future<Output = Result<()>> + Send;

    fn apply_settings(&self, settings: WorldSettings) -> impl Future<Output = Result<()>> + Send;

    /// Put the traffic manager in synchronous mode and seed its RNG
    fn configure_traffic_manager(
        &self,
        port: u16,
        seed: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_weather(&self, weather: WeatherSpec) -> impl Future<Output = Result<()>> + Send;

    /// Number of recommended vehicle spawn points of the loaded map
    fn spawn_point_count(&self) -> Result<usize>;

    fn vehicle_blueprints(&self) -> Result<Vec<VehicleBlueprint>>;

    fn pedestrian_blueprints(&self) -> Result<Vec<String>>;

    /// Try to spawn a vehicle at a spawn point
    ///
    /// Returns `Ok(None)` when the spot is occupied.
    fn spawn_vehicle(
        &self,
        blueprint: &str,
        spawn_point: usize,
        autopilot: bool,
    ) -> impl Future<Output = Result<Option<SpawnedVehicle>>> + Send;

    /// Try to spawn a pedestrian (with its AI controller) at a random navigable location
    ///
    /// Returns `Ok(None)` when the spot is occupied.
    fn spawn_pedestrian(
        &self,
        blueprint: &str,
    ) -> impl Future<Output = Result<Option<ActorId>>> + Send;

    /// Start pedestrian controllers (only valid after the first tick)
    fn start_pedestrians(&self) -> impl Future<Output = Result<()>> + Send;

    /// Spawn sensor and attach to parent actor
    fn spawn_sensor(
        &self,
        blueprint: &str,
        transform: Transform,
        parent_id: ActorId,
        attributes: &HashMap<String, String>,
    ) -> impl Future<Output = Result<ActorId>> + Send;

    /// Destroy actor
    ///
    /// Idempotent operation: returns Ok if actor doesn't exist
    fn destroy_actor(&self, actor_id: ActorId) -> impl Future<Output = Result<()>> + Send;

    fn actor_exists(&self, actor_id: ActorId) -> impl Future<Output = Result<bool>> + Send;

    /// Advance the world by one fixed step
    ///
    /// Sensor callbacks for this step may fire before or after this returns.
    fn tick(&self) -> impl Future<Output = Result<WorldTick>> + Send;

    fn vehicle_state(&self, actor_id: ActorId) -> impl Future<Output = Result<VehicleState>> + Send;

    /// Switch the red light governing `actor_id` to green; returns whether a light changed
    fn force_green(
        &self,
        actor_id: ActorId,
        green_time: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Get sensor data source
    ///
    /// Returns `None` if the actor doesn't exist or isn't a sensor.
    fn get_sensor_source(
        &self,
        actor_id: ActorId,
        sensor_id: String,
        kind: SensorKind,
        unit: u8,
    ) -> Option<Box<dyn SensorSource>>;
}
