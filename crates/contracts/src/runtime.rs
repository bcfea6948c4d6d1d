//! RigHandles - Actor Factory output
//!
//! Runtime actor handles of one spawned ego rig, plus the pose types used to mount it.

use serde::{Deserialize, Serialize};

use crate::SensorKind;

/// Simulator actor handle type
pub type ActorId = u32;

/// 3D transform: location (m) + rotation (deg)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub location: Location,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Half-size of a vehicle bounding box (m)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleExtent {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Transform {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            location: Location { x, y, z },
            rotation: Rotation::default(),
        }
    }
}

/// One spawned sensor of the rig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigSensor {
    pub kind: SensorKind,
    /// Sub-unit index (only LiDAR groups have more than one)
    pub unit: u8,
    pub actor_id: ActorId,
}

/// Runtime handles of the ego vehicle and its rigidly mounted sensors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RigHandles {
    pub ego: Option<ActorId>,
    pub sensors: Vec<RigSensor>,
}

impl RigHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sensor(&mut self, kind: SensorKind, unit: u8, actor_id: ActorId) {
        self.sensors.push(RigSensor {
            kind,
            unit,
            actor_id,
        });
    }

    pub fn sensors_of(&self, kind: SensorKind) -> impl Iterator<Item = &RigSensor> {
        self.sensors.iter().filter(move |s| s.kind == kind)
    }

    /// All actor handles, sensors first (teardown order)
    pub fn all_actor_ids(&self) -> Vec<ActorId> {
        self.sensors
            .iter()
            .map(|s| s.actor_id)
            .chain(self.ego)
            .collect()
    }
}
