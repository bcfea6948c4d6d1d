//! Real CARLA client implementation
//!
//! Connects to the CARLA server using the carla-rust crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use carla::client::{ActorBase, Client, Sensor, TrafficManager, Vehicle, Walker, World};
use carla::geom::{Location, Rotation, Transform as CarlaTransform};
use carla::rpc::{TrafficLightState, WeatherParameters};
use contracts::{
    ActorId, Location as Loc, Rotation as Rot, SensorKind, SensorSource, Transform, VehicleExtent,
    WeatherSpec,
};
use tracing::{debug, info, instrument, warn};

use crate::carla_sensor_source::CarlaSensorSource;
use crate::client::{
    SimulatorClient, SpawnedVehicle, VehicleBlueprint, VehicleState, WorldSettings, WorldTick,
};
use crate::error::{ActorFactoryError, Result};

/// Real CARLA client
///
/// Wraps carla-rust's Client. Uses Mutex for interior mutability, allowing
/// `&self` methods to modify the World.
#[derive(Default, Clone)]
pub struct RealCarlaClient {
    client: Arc<Mutex<Option<Client>>>,
    world: Arc<Mutex<Option<World>>>,
    traffic_manager: Arc<Mutex<Option<TrafficManager>>>,
    /// Created actors (for teardown)
    actors: Arc<Mutex<HashMap<ActorId, ActorType>>>,
    /// Pedestrian AI controllers, started after the first tick
    walker_controllers: Arc<Mutex<Vec<carla::client::Actor>>>,
}

#[derive(Clone)]
enum ActorType {
    Vehicle(Vehicle),
    Walker(Walker),
    Sensor(Sensor),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RealCarlaClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_world_mut<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut World) -> Result<R>,
    {
        let mut world_guard = lock(&self.world);
        let world = world_guard
            .as_mut()
            .ok_or_else(|| ActorFactoryError::connection("not connected to CARLA server"))?;
        f(world)
    }

    fn store_actor(&self, actor_id: ActorId, actor: ActorType) {
        lock(&self.actors).insert(actor_id, actor);
    }

    fn vehicle(&self, actor_id: ActorId) -> Result<Vehicle> {
        match lock(&self.actors).get(&actor_id) {
            Some(ActorType::Vehicle(v)) => Ok(v.clone()),
            _ => Err(ActorFactoryError::vehicle_spawn(
                format!("actor_{actor_id}"),
                "vehicle not found",
            )),
        }
    }

    fn to_carla_transform(transform: Transform) -> CarlaTransform {
        CarlaTransform {
            location: Location {
                x: transform.location.x as f32,
                y: transform.location.y as f32,
                z: transform.location.z as f32,
            },
            rotation: Rotation {
                pitch: transform.rotation.pitch as f32,
                yaw: transform.rotation.yaw as f32,
                roll: transform.rotation.roll as f32,
            },
        }
    }

    fn from_carla_transform(t: &CarlaTransform) -> Transform {
        Transform {
            location: Loc {
                x: t.location.x as f64,
                y: t.location.y as f64,
                z: t.location.z as f64,
            },
            rotation: Rot {
                pitch: t.rotation.pitch as f64,
                yaw: t.rotation.yaw as f64,
                roll: t.rotation.roll as f64,
            },
        }
    }

    fn destroy_sensor_actor(sensor: Sensor, actor_id: ActorId) {
        if sensor.is_listening() {
            sensor.stop();
        }
        if !sensor.destroy() {
            warn!(actor_id, "destroy sensor returned false");
        }
    }
}

impl SimulatorClient for RealCarlaClient {
    #[instrument(name = "real_carla_connect", skip(self), fields(host = %host, port))]
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let mut client = Client::connect(host, port, None);
        client.set_timeout(timeout);
        let world = client.world();

        info!(map = %world.map().name(), "connected to CARLA server");

        *lock(&self.client) = Some(client);
        *lock(&self.world) = Some(world);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.world).is_some()
    }

    #[instrument(name = "real_carla_load_world", skip(self))]
    async fn load_world(&self, map: &str) -> Result<()> {
        let client = lock(&self.client)
            .clone()
            .ok_or_else(|| ActorFactoryError::connection("not connected to CARLA server"))?;
        let world = client.load_world(map);
        lock(&self.actors).clear();
        lock(&self.walker_controllers).clear();
        *lock(&self.world) = Some(world);
        Ok(())
    }

    async fn apply_settings(&self, settings: WorldSettings) -> Result<()> {
        self.with_world_mut(|world| {
            let mut episode = world.settings();
            episode.synchronous_mode = settings.synchronous;
            episode.fixed_delta_seconds = settings.fixed_delta_seconds;
            world.apply_settings(&episode, Duration::from_secs(10));
            Ok(())
        })
    }

    async fn configure_traffic_manager(&self, port: u16, seed: u64) -> Result<()> {
        let client = lock(&self.client)
            .clone()
            .ok_or_else(|| ActorFactoryError::connection("not connected to CARLA server"))?;
        let mut tm = client.instance_tm(Some(port));
        tm.set_synchronous_mode(true);
        tm.set_random_device_seed(seed);
        *lock(&self.traffic_manager) = Some(tm);
        Ok(())
    }

    async fn set_weather(&self, weather: WeatherSpec) -> Result<()> {
        self.with_world_mut(|world| {
            let mut params: WeatherParameters = world.weather();
            params.sun_altitude_angle = weather.sun_altitude_deg;
            params.cloudiness = weather.cloudiness;
            world.set_weather(&params);
            Ok(())
        })
    }

    fn spawn_point_count(&self) -> Result<usize> {
        self.with_world_mut(|world| Ok(world.map().recommended_spawn_points().len()))
    }

    fn vehicle_blueprints(&self) -> Result<Vec<VehicleBlueprint>> {
        self.with_world_mut(|world| {
            Ok(world
                .blueprint_library()
                .filter("vehicle.*")
                .iter()
                .map(|bp| VehicleBlueprint {
                    id: bp.id().to_string(),
                    wheels: bp
                        .attribute("number_of_wheels")
                        .and_then(|a| a.value_string().parse().ok())
                        .unwrap_or(4),
                })
                .collect())
        })
    }

    fn pedestrian_blueprints(&self) -> Result<Vec<String>> {
        self.with_world_mut(|world| {
            Ok(world
                .blueprint_library()
                .filter("walker.pedestrian.*")
                .iter()
                .map(|bp| bp.id().to_string())
                .collect())
        })
    }

    #[instrument(name = "real_carla_spawn_vehicle", skip(self), fields(blueprint = %blueprint))]
    async fn spawn_vehicle(
        &self,
        blueprint: &str,
        spawn_point: usize,
        autopilot: bool,
    ) -> Result<Option<SpawnedVehicle>> {
        let spawned = self.with_world_mut(|world| {
            let bp = world
                .blueprint_library()
                .find(blueprint)
                .ok_or_else(|| ActorFactoryError::vehicle_spawn(blueprint, "blueprint not found"))?;
            let points = world.map().recommended_spawn_points();
            let transform = points.get(spawn_point).ok_or_else(|| {
                ActorFactoryError::vehicle_spawn(blueprint, "spawn point out of range")
            })?;
            // 出生点被占用时 spawn 失败，交由调用方换点重试
            let Ok(actor) = world.spawn_actor(&bp, transform) else {
                return Ok(None);
            };
            Vehicle::try_from(actor)
                .map(Some)
                .map_err(|_| ActorFactoryError::vehicle_spawn(blueprint, "not a vehicle"))
        })?;

        let Some(vehicle) = spawned else {
            return Ok(None);
        };
        let actor_id = vehicle.id();
        if autopilot {
            vehicle.set_autopilot(true);
        }
        let bb = vehicle.bounding_box();
        let extent = VehicleExtent {
            x: bb.extent.x as f64,
            y: bb.extent.y as f64,
            z: bb.extent.z as f64,
        };
        debug!(actor_id, autopilot, "vehicle spawned");
        self.store_actor(actor_id, ActorType::Vehicle(vehicle));
        Ok(Some(SpawnedVehicle { actor_id, extent }))
    }

    async fn spawn_pedestrian(&self, blueprint: &str) -> Result<Option<ActorId>> {
        let spawned = self.with_world_mut(|world| {
            let library = world.blueprint_library();
            let Some(bp) = library.find(blueprint) else {
                return Ok(None);
            };
            let Some(location) = world.random_location_from_navigation() else {
                return Ok(None);
            };
            let transform = CarlaTransform {
                location,
                rotation: Rotation::default(),
            };
            let Ok(actor) = world.spawn_actor(&bp, &transform) else {
                return Ok(None);
            };
            let Ok(walker) = Walker::try_from(actor) else {
                return Ok(None);
            };
            let controller = library.find("controller.ai.walker").and_then(|cbp| {
                world
                    .spawn_actor_attached(&cbp, &CarlaTransform::default(), &walker, None)
                    .ok()
            });
            Ok(Some((walker, controller)))
        })?;

        let Some((walker, controller)) = spawned else {
            return Ok(None);
        };
        let actor_id = walker.id();
        if let Some(controller) = controller {
            lock(&self.walker_controllers).push(controller);
        }
        self.store_actor(actor_id, ActorType::Walker(walker));
        Ok(Some(actor_id))
    }

    async fn start_pedestrians(&self) -> Result<()> {
        let controllers = lock(&self.walker_controllers).clone();
        self.with_world_mut(|world| {
            for controller in controllers {
                if let Ok(ai) = carla::client::WalkerAIController::try_from(controller) {
                    ai.start();
                    if let Some(target) = world.random_location_from_navigation() {
                        ai.go_to_location(&target);
                    }
                    ai.set_max_speed(1.4);
                }
            }
            Ok(())
        })
    }

    #[instrument(
        name = "real_carla_spawn_sensor",
        skip(self, transform, attributes),
        fields(blueprint = %blueprint, parent_id)
    )]
    async fn spawn_sensor(
        &self,
        blueprint: &str,
        transform: Transform,
        parent_id: ActorId,
        attributes: &HashMap<String, String>,
    ) -> Result<ActorId> {
        let parent = self.vehicle(parent_id).map_err(|_| {
            ActorFactoryError::sensor_spawn(
                blueprint,
                format!("actor_{parent_id}"),
                "parent vehicle not found",
            )
        })?;
        let sensor = self.with_world_mut(|world| {
            let mut bp = world.blueprint_library().find(blueprint).ok_or_else(|| {
                ActorFactoryError::sensor_spawn(
                    blueprint,
                    format!("actor_{parent_id}"),
                    "blueprint not found",
                )
            })?;
            for (key, value) in attributes {
                if !bp.set_attribute(key, value) {
                    warn!(key, value, "failed to set sensor attribute");
                }
            }
            let actor = world
                .spawn_actor_attached(&bp, &Self::to_carla_transform(transform), &parent, None)
                .map_err(|e| {
                    ActorFactoryError::sensor_spawn(
                        blueprint,
                        format!("actor_{parent_id}"),
                        e.to_string(),
                    )
                })?;
            Sensor::try_from(actor).map_err(|_| {
                ActorFactoryError::sensor_spawn(
                    blueprint,
                    format!("actor_{parent_id}"),
                    "spawned actor is not a sensor",
                )
            })
        })?;

        let actor_id = sensor.id();
        debug!(actor_id, blueprint, parent_id, "sensor spawned and attached");
        self.store_actor(actor_id, ActorType::Sensor(sensor));
        Ok(actor_id)
    }

    #[instrument(name = "real_carla_destroy_actor", skip(self), fields(actor_id))]
    async fn destroy_actor(&self, actor_id: ActorId) -> Result<()> {
        let removed = lock(&self.actors).remove(&actor_id);
        match removed {
            Some(ActorType::Sensor(s)) => Self::destroy_sensor_actor(s, actor_id),
            Some(ActorType::Vehicle(v)) => {
                if !v.destroy() {
                    warn!(actor_id, "destroy vehicle returned false");
                }
            }
            Some(ActorType::Walker(w)) => {
                if !w.destroy() {
                    warn!(actor_id, "destroy walker returned false");
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn actor_exists(&self, actor_id: ActorId) -> Result<bool> {
        Ok(lock(&self.actors).contains_key(&actor_id))
    }

    async fn tick(&self) -> Result<WorldTick> {
        self.with_world_mut(|world| {
            let frame = world.tick();
            let elapsed_seconds = world.snapshot().timestamp().elapsed_seconds;
            Ok(WorldTick {
                frame: frame as u64,
                elapsed_seconds,
            })
        })
    }

    async fn vehicle_state(&self, actor_id: ActorId) -> Result<VehicleState> {
        let vehicle = self.vehicle(actor_id)?;
        Ok(VehicleState {
            transform: Self::from_carla_transform(&vehicle.transform()),
            at_red_light: vehicle.is_at_traffic_light()
                && vehicle.traffic_light_state() == TrafficLightState::Red,
        })
    }

    async fn force_green(&self, actor_id: ActorId, green_time: Duration) -> Result<bool> {
        let vehicle = self.vehicle(actor_id)?;
        let Some(light) = vehicle.traffic_light() else {
            return Ok(false);
        };
        if light.state() != TrafficLightState::Red {
            return Ok(false);
        }
        light.set_state(TrafficLightState::Green);
        light.set_green_time(green_time.as_secs_f32());
        Ok(true)
    }

    fn get_sensor_source(
        &self,
        actor_id: ActorId,
        sensor_id: String,
        kind: SensorKind,
        unit: u8,
    ) -> Option<Box<dyn SensorSource>> {
        match lock(&self.actors).get(&actor_id) {
            Some(ActorType::Sensor(sensor)) => Some(Box::new(CarlaSensorSource::new(
                sensor_id,
                kind,
                unit,
                sensor.clone(),
            ))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires CARLA server"]
    async fn test_real_client_connect() {
        let mut client = RealCarlaClient::new();
        client
            .connect("localhost", 2000, Duration::from_secs(20))
            .await
            .unwrap();
        assert!(client.is_connected());
    }
}
