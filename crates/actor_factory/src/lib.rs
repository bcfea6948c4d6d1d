//! # Actor Factory
//!
//! 仿真器资产工厂。
//!
//! Responsibilities:
//! - Abstract the synchronous-mode simulator behind `SimulatorClient`
//! - Spawn the ego rig (`RigFactory`) and background traffic (`TrafficSpawner`)
//! - Manage actor lifecycle: teardown and rollback
//! - Provide a unified `SensorSource` abstraction
//! - Mock simulator with fault injection for tests
//!
//! ## Feature Flags
//!
//! - `real-carla`: Enable the real CARLA client (requires the carla crate)

pub mod client;
pub mod error;
pub mod factory;
pub mod mock_client;
pub mod mock_sensor;
pub mod traffic;

#[cfg(feature = "real-carla")]
pub mod carla_client;
#[cfg(feature = "real-carla")]
pub mod carla_sensor_source;
#[cfg(feature = "real-carla")]
pub mod sensor_data_converter;

pub use client::{
    SimulatorClient, SpawnedVehicle, VehicleBlueprint, VehicleState, WorldSettings, WorldTick,
};
pub use contracts::{ActorId, RigHandles, SensorSource};
pub use error::{ActorFactoryError, Result};
pub use factory::{lidar_units, mount_transform, LidarUnit, RigFactory, SensorSpec};
pub use mock_client::{MockConfig, MockSimulator};
pub use mock_sensor::{MockSensor, MockSensorConfig};
pub use traffic::{release_red_lights, Traffic, TrafficSpawner};

#[cfg(feature = "real-carla")]
pub use carla_client::RealCarlaClient;
#[cfg(feature = "real-carla")]
pub use carla_sensor_source::CarlaSensorSource;
