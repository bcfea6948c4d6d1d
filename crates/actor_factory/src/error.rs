//! Actor Factory error types

use contracts::ContractError;
use thiserror::Error;

/// Actor Factory specific error
#[derive(Debug, Error)]
pub enum ActorFactoryError {
    /// Simulator unreachable, or the connection dropped
    #[error("simulator connection failed: {message}")]
    ConnectionFailed { message: String },

    /// World setup step failed (map load, settings, weather, traffic manager)
    #[error("world setup failed during {step}: {message}")]
    WorldSetup { step: String, message: String },

    /// Vehicle spawn error
    #[error("failed to spawn vehicle '{vehicle_id}': {message}")]
    VehicleSpawnFailed { vehicle_id: String, message: String },

    /// Sensor spawn error
    #[error("failed to spawn sensor '{sensor_id}' on vehicle '{vehicle_id}': {message}")]
    SensorSpawnFailed {
        sensor_id: String,
        vehicle_id: String,
        message: String,
    },

    /// Destroy error
    #[error("failed to destroy actor {actor_id}: {message}")]
    DestroyFailed { actor_id: u32, message: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ActorFactoryError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn world_setup(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorldSetup {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create vehicle spawn error
    pub fn vehicle_spawn(vehicle_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VehicleSpawnFailed {
            vehicle_id: vehicle_id.into(),
            message: message.into(),
        }
    }

    /// Create sensor spawn error
    pub fn sensor_spawn(
        sensor_id: impl Into<String>,
        vehicle_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SensorSpawnFailed {
            sensor_id: sensor_id.into(),
            vehicle_id: vehicle_id.into(),
            message: message.into(),
        }
    }
}

impl From<ActorFactoryError> for ContractError {
    fn from(err: ActorFactoryError) -> Self {
        match err {
            ActorFactoryError::ConnectionFailed { message } => {
                ContractError::SimulatorConnectionLost { message }
            }
            ActorFactoryError::WorldSetup { step, message } => {
                ContractError::SimulatorConnectionLost {
                    message: format!("{step}: {message}"),
                }
            }
            ActorFactoryError::VehicleSpawnFailed {
                vehicle_id,
                message,
            } => ContractError::spawn_failed(vehicle_id, message),
            ActorFactoryError::SensorSpawnFailed {
                sensor_id, message, ..
            } => ContractError::spawn_failed(sensor_id, message),
            ActorFactoryError::DestroyFailed { actor_id, message } => {
                ContractError::Other(format!("destroy actor {actor_id}: {message}"))
            }
            ActorFactoryError::Contract(inner) => inner,
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ActorFactoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_maps_to_retryable_contract_error() {
        let err: ContractError = ActorFactoryError::connection("refused").into();
        assert!(matches!(err, ContractError::SimulatorConnectionLost { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sensor_spawn_keeps_sensor_name() {
        let err: ContractError = ActorFactoryError::sensor_spawn("lidar.0", "ego", "no slot").into();
        match err {
            ContractError::SpawnFailed { actor, .. } => assert_eq!(actor, "lidar.0"),
            other => panic!("unexpected: {other}"),
        }
    }
}
