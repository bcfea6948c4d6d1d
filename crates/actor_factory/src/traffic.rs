//! 背景交通
//!
//! 自动驾驶车辆与行人，以及红灯放行。

use std::time::Duration;

use contracts::{ActorId, Transform};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use tracing::{debug, instrument, warn};

use crate::client::SimulatorClient;
use crate::error::Result;
use crate::factory::destroy_actor_safe;

/// 红灯放行时的绿灯时长
pub const GREEN_TIME: Duration = Duration::from_secs(10);
/// 与自车同向排队的判定距离 (米)
pub const QUEUE_RADIUS_M: f64 = 20.0;
/// 同向判定的最大航向差 (度)
pub const QUEUE_MAX_YAW_DIFF_DEG: f64 = 20.0;

/// 已生成的背景交通
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traffic {
    pub vehicles: Vec<ActorId>,
    pub pedestrians: Vec<ActorId>,
}

impl Traffic {
    pub fn len(&self) -> usize {
        self.vehicles.len() + self.pedestrians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 背景交通生成器
pub struct TrafficSpawner<'a, C: SimulatorClient> {
    client: &'a C,
}

impl<'a, C: SimulatorClient> TrafficSpawner<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// 生成 `vehicles` 辆自动驾驶车辆和 `pedestrians` 个行人
    ///
    /// 尝试次数上限为目标数量的 10 倍，不足时只记录警告。
    #[instrument(name = "traffic_spawn", skip(self))]
    pub async fn spawn(&self, seed: u64, vehicles: u32, pedestrians: u32) -> Result<Traffic> {
        // 与自车的随机流错开
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        let mut traffic = Traffic::default();

        let blueprints = self.client.vehicle_blueprints()?;
        let mut points: Vec<usize> = (0..self.client.spawn_point_count()?).collect();
        points.shuffle(&mut rng);

        let attempts = (vehicles as usize * 10).min(points.len());
        for &point in points.iter().take(attempts) {
            if traffic.vehicles.len() >= vehicles as usize {
                break;
            }
            let Some(bp) = blueprints.choose(&mut rng) else {
                break;
            };
            if let Some(vehicle) = self.client.spawn_vehicle(&bp.id, point, true).await? {
                traffic.vehicles.push(vehicle.actor_id);
            }
        }

        let walkers = self.client.pedestrian_blueprints()?;
        for _ in 0..pedestrians as usize * 10 {
            if traffic.pedestrians.len() >= pedestrians as usize {
                break;
            }
            let Some(bp) = walkers.choose(&mut rng) else {
                break;
            };
            if let Some(id) = self.client.spawn_pedestrian(bp).await? {
                traffic.pedestrians.push(id);
            }
        }

        if traffic.vehicles.len() < vehicles as usize
            || traffic.pedestrians.len() < pedestrians as usize
        {
            warn!(
                vehicles = traffic.vehicles.len(),
                pedestrians = traffic.pedestrians.len(),
                "spawned less traffic than requested"
            );
        } else {
            debug!(total = traffic.len(), "traffic spawned");
        }
        Ok(traffic)
    }

    /// 销毁全部背景交通，幂等
    pub async fn teardown(&self, traffic: &Traffic) {
        for &id in traffic.pedestrians.iter().chain(traffic.vehicles.iter()) {
            destroy_actor_safe(self.client, id).await;
        }
    }
}

fn yaw_diff_deg(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn queued_behind(ego: &Transform, other: &Transform) -> bool {
    let dx = ego.location.x - other.location.x;
    let dy = ego.location.y - other.location.y;
    let dz = ego.location.z - other.location.z;
    (dx * dx + dy * dy + dz * dz).sqrt() < QUEUE_RADIUS_M
        && yaw_diff_deg(ego.rotation.yaw, other.rotation.yaw) < QUEUE_MAX_YAW_DIFF_DEG
}

/// 自车在红灯前时将其放行，同时放行附近同向排队的车辆
///
/// 返回被切换为绿灯的次数。
pub async fn release_red_lights<C: SimulatorClient>(
    client: &C,
    ego: ActorId,
    traffic: &[ActorId],
) -> Result<u32> {
    let ego_state = client.vehicle_state(ego).await?;
    let mut released = 0;
    if ego_state.at_red_light && client.force_green(ego, GREEN_TIME).await? {
        released += 1;
    }

    for &id in traffic {
        let state = client.vehicle_state(id).await?;
        if state.at_red_light
            && queued_behind(&ego_state.transform, &state.transform)
            && client.force_green(id, GREEN_TIME).await?
        {
            released += 1;
        }
    }

    if released > 0 {
        debug!(released, "red lights released");
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WorldSettings;
    use crate::mock_client::{MockConfig, MockSimulator};
    use contracts::{Location, Rotation};

    async fn world(config: MockConfig) -> MockSimulator {
        let mut sim = MockSimulator::with_config(config);
        sim.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town02").await.unwrap();
        sim.apply_settings(WorldSettings::synchronous(0.05))
            .await
            .unwrap();
        sim
    }

    #[tokio::test]
    async fn test_spawn_and_teardown() {
        let sim = world(MockConfig::default()).await;
        let spawner = TrafficSpawner::new(&sim);
        let traffic = spawner.spawn(7, 10, 5).await.unwrap();
        assert_eq!(traffic.vehicles.len(), 10);
        assert_eq!(traffic.pedestrians.len(), 5);
        assert_eq!(sim.actor_count(), 15);

        spawner.teardown(&traffic).await;
        spawner.teardown(&traffic).await;
        assert_eq!(sim.actor_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_short_of_spawn_points() {
        let config = MockConfig {
            spawn_points: 4,
            ..Default::default()
        };
        let sim = world(config).await;
        let traffic = TrafficSpawner::new(&sim).spawn(1, 10, 0).await.unwrap();
        assert_eq!(traffic.vehicles.len(), 4);
    }

    #[test]
    fn test_queue_detection() {
        let at = |x: f64, yaw: f64| Transform {
            location: Location { x, y: 0.0, z: 0.0 },
            rotation: Rotation {
                yaw,
                ..Default::default()
            },
        };
        assert!(queued_behind(&at(0.0, 0.0), &at(10.0, 355.0)));
        assert!(!queued_behind(&at(0.0, 0.0), &at(30.0, 0.0)));
        assert!(!queued_behind(&at(0.0, 0.0), &at(5.0, 90.0)));
    }

    #[tokio::test]
    async fn test_release_red_light() {
        let config = MockConfig {
            red_light_period: Some(1),
            ..Default::default()
        };
        let sim = world(config).await;
        let ego = sim.spawn_vehicle("vehicle.audi.a2", 0, true).await.unwrap().unwrap();
        let near = sim.spawn_vehicle("vehicle.audi.a2", 1, true).await.unwrap().unwrap();
        let far = sim.spawn_vehicle("vehicle.audi.a2", 50, true).await.unwrap().unwrap();

        let released = release_red_lights(&sim, ego.actor_id, &[near.actor_id, far.actor_id])
            .await
            .unwrap();
        assert_eq!(released, 2);
        assert_eq!(sim.forced_green_count(), 2);

        // 已放行，不会重复切换
        let again = release_red_lights(&sim, ego.actor_id, &[near.actor_id])
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
