//! RigFactory 核心实现
//!
//! 生成自车及其刚性安装的四类传感器 (事件相机、LiDAR、RGB、深度)，管理生命周期。
//! 所有传感器共用同一个相对位姿：车顶上方，高度足以让 LiDAR 最低线束不打到车顶。

use std::collections::HashMap;

use contracts::{
    ActorId, LidarConfig, RigConfig, RigHandles, SensorKind, Transform, VehicleExtent,
};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use tracing::{error, info, instrument, warn};

use crate::client::{SimulatorClient, SpawnedVehicle, VehicleBlueprint};
use crate::error::{ActorFactoryError, Result};

/// 不适合作为自车的大型车辆
const LARGE_VEHICLES: [&str; 7] = [
    "carlacola",
    "firetruck",
    "ambulance",
    "sprinter",
    "t2",
    "t2_2021",
    "fusorosa",
];

/// 单个 LiDAR 子单元
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarUnit {
    pub channels: u32,
    pub points_per_cloud: u32,
    pub upper_fov_deg: f32,
    pub lower_fov_deg: f32,
}

/// 一个待生成的传感器
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub kind: SensorKind,
    pub unit: u8,
    pub attributes: HashMap<String, String>,
}

impl SensorSpec {
    /// 装配内名称，如 `lidar.1`
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind, self.unit)
    }
}

/// 计算 LiDAR 子单元布局
///
/// Pandora 布局把线束按 5/25/10 (每 40 线) 分成上、中、下三段，中段最密。
pub fn lidar_units(config: &LidarConfig) -> Vec<LidarUnit> {
    if !config.pandora {
        return vec![LidarUnit {
            channels: config.channels,
            points_per_cloud: config.points_per_cloud,
            upper_fov_deg: config.upper_fov_deg,
            lower_fov_deg: config.lower_fov_deg,
        }];
    }

    const SPLIT: [(u32, f32, f32); 3] = [(5, 7.0, 3.0), (25, 2.0, -6.0), (10, -7.0, -16.0)];
    SPLIT
        .iter()
        .map(|&(share, upper, lower)| LidarUnit {
            channels: (config.channels * share / 40).max(1),
            points_per_cloud: (config.points_per_cloud as u64 * share as u64 / 40) as u32,
            upper_fov_deg: upper,
            lower_fov_deg: lower,
        })
        .collect()
}

/// 传感器挂载位姿
///
/// 高度 = 2 * extent.z + max(extent.x, extent.y) * tan(-lower_fov)
pub fn mount_transform(extent: VehicleExtent, lower_fov_deg: f32) -> Transform {
    let margin = extent.x.max(extent.y) * (-(lower_fov_deg as f64)).to_radians().tan();
    Transform::at(0.0, 0.0, 2.0 * extent.z + margin)
}

/// 从候选蓝图中选出四轮小型车
pub fn ego_candidates(blueprints: &[VehicleBlueprint]) -> Vec<&VehicleBlueprint> {
    blueprints
        .iter()
        .filter(|bp| bp.wheels == 4)
        .filter(|bp| {
            let suffix = bp.id.rsplit('.').next().unwrap_or(&bp.id);
            !LARGE_VEHICLES.contains(&suffix)
        })
        .collect()
}

fn attrs(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Rig Factory
///
/// 负责生成自车与传感器，并提供 teardown 和回滚能力。
pub struct RigFactory<'a, C: SimulatorClient> {
    client: &'a C,
    rig: &'a RigConfig,
    tick_hz: f64,
}

impl<'a, C: SimulatorClient> RigFactory<'a, C> {
    /// 创建新的 RigFactory
    pub fn new(client: &'a C, rig: &'a RigConfig, tick_hz: f64) -> Self {
        Self {
            client,
            rig,
            tick_hz,
        }
    }

    /// 全部传感器的蓝图属性
    ///
    /// 所有传感器 `sensor_tick = 0`，即每个仿真 tick 出一帧；LiDAR 每 tick 转一圈。
    pub fn sensor_specs(&self) -> Vec<SensorSpec> {
        let ev = &self.rig.event_camera;
        let mut specs = vec![SensorSpec {
            kind: SensorKind::Events,
            unit: 0,
            attributes: attrs(&[
                ("image_size_x", ev.width.to_string()),
                ("image_size_y", ev.height.to_string()),
                ("fov", ev.fov_deg.to_string()),
                ("gamma", ev.gamma.to_string()),
                ("motion_blur_intensity", "0.0".to_string()),
                ("use_log", if ev.use_log { "True" } else { "False" }.to_string()),
                ("positive_threshold", ev.positive_threshold.to_string()),
                ("negative_threshold", ev.negative_threshold.to_string()),
                ("sensor_tick", "0.0".to_string()),
            ]),
        }];

        for (unit, lidar) in lidar_units(&self.rig.lidar).into_iter().enumerate() {
            specs.push(SensorSpec {
                kind: SensorKind::Lidar,
                unit: unit as u8,
                attributes: attrs(&[
                    ("rotation_frequency", self.tick_hz.to_string()),
                    (
                        "points_per_second",
                        (lidar.points_per_cloud as f64 * self.tick_hz).round().to_string(),
                    ),
                    ("range", self.rig.lidar.range_m.to_string()),
                    ("channels", lidar.channels.to_string()),
                    ("upper_fov", lidar.upper_fov_deg.to_string()),
                    ("lower_fov", lidar.lower_fov_deg.to_string()),
                    ("dropoff_general_rate", "0.0".to_string()),
                    ("dropoff_intensity_limit", "1.0".to_string()),
                    ("dropoff_zero_intensity", "0.0".to_string()),
                    ("sensor_tick", "0.0".to_string()),
                ]),
            });
        }

        let rgb = &self.rig.rgb;
        specs.push(SensorSpec {
            kind: SensorKind::Rgb,
            unit: 0,
            attributes: attrs(&[
                ("image_size_x", rgb.width.to_string()),
                ("image_size_y", rgb.height.to_string()),
                ("fov", rgb.fov_deg.to_string()),
                ("enable_postprocess_effects", "True".to_string()),
                ("gamma", "2.2".to_string()),
                ("sensor_tick", "0.0".to_string()),
            ]),
        });

        let depth = &self.rig.depth;
        specs.push(SensorSpec {
            kind: SensorKind::Depth,
            unit: 0,
            attributes: attrs(&[
                ("image_size_x", depth.width.to_string()),
                ("image_size_y", depth.height.to_string()),
                ("fov", depth.fov_deg.to_string()),
                ("sensor_tick", "0.0".to_string()),
            ]),
        });

        specs
    }

    /// 生成自车与全部传感器
    ///
    /// # 原子性保证
    /// 任一传感器生成失败，会回滚销毁已创建的传感器和自车。
    #[instrument(name = "rig_factory_spawn_rig", skip(self), fields(seed))]
    pub async fn spawn_rig(&self, seed: u64, autopilot: bool) -> Result<RigHandles> {
        let mut rng = StdRng::seed_from_u64(seed);
        let ego = self.spawn_ego(&mut rng, autopilot).await?;

        let mut rig = RigHandles::new();
        rig.ego = Some(ego.actor_id);

        let transform = mount_transform(ego.extent, self.rig.lidar.lower_fov_deg);
        for spec in self.sensor_specs() {
            match self
                .client
                .spawn_sensor(spec.kind.blueprint(), transform, ego.actor_id, &spec.attributes)
                .await
            {
                Ok(actor_id) => {
                    rig.register_sensor(spec.kind, spec.unit, actor_id);
                    info!(sensor = %spec.name(), actor_id, "sensor spawned and attached");
                }
                Err(e) => {
                    // 回滚整个 rig
                    warn!(
                        sensor = %spec.name(),
                        error = %e,
                        "sensor spawn failed, rolling back rig"
                    );
                    self.teardown(&rig).await;
                    return Err(ActorFactoryError::sensor_spawn(
                        spec.name(),
                        "ego",
                        e.to_string(),
                    ));
                }
            }
        }

        info!(
            ego = ego.actor_id,
            sensors = rig.sensors.len(),
            mount_z = transform.location.z,
            "rig spawned"
        );
        Ok(rig)
    }

    /// 随机选择小型车，按打乱顺序尝试出生点直到成功
    async fn spawn_ego(&self, rng: &mut StdRng, autopilot: bool) -> Result<SpawnedVehicle> {
        let blueprints = self.client.vehicle_blueprints()?;
        let candidates = ego_candidates(&blueprints);
        let blueprint = candidates
            .choose(rng)
            .ok_or_else(|| ActorFactoryError::vehicle_spawn("ego", "no suitable car blueprint"))?;

        let mut points: Vec<usize> = (0..self.client.spawn_point_count()?).collect();
        points.shuffle(rng);

        for point in points {
            if let Some(vehicle) = self
                .client
                .spawn_vehicle(&blueprint.id, point, autopilot)
                .await?
            {
                info!(blueprint = %blueprint.id, spawn_point = point, actor_id = vehicle.actor_id, "ego spawned");
                return Ok(vehicle);
            }
        }

        Err(ActorFactoryError::vehicle_spawn(
            "ego",
            "every spawn point is occupied",
        ))
    }

    /// 销毁 rig 中的所有 actors (先传感器后自车)
    ///
    /// # 幂等性
    /// 多次调用安全，不存在的 actor 会被忽略。
    #[instrument(
        name = "rig_factory_teardown",
        skip(self, rig),
        fields(sensor_count = rig.sensors.len())
    )]
    pub async fn teardown(&self, rig: &RigHandles) {
        for actor_id in rig.all_actor_ids() {
            destroy_actor_safe(self.client, actor_id).await;
        }
    }
}

/// 安全销毁 actor (忽略错误，仅记录日志)
pub(crate) async fn destroy_actor_safe<C: SimulatorClient>(client: &C, actor_id: ActorId) {
    if let Err(e) = client.destroy_actor(actor_id).await {
        error!(actor_id, error = %e, "failed to destroy actor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WorldSettings;
    use crate::mock_client::{MockConfig, MockSimulator};
    use contracts::{GenerationConfig, SensorKind};
    use std::time::Duration;

    async fn world(config: MockConfig, seed: u64) -> MockSimulator {
        let mut sim = MockSimulator::with_config(config);
        sim.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town01").await.unwrap();
        sim.apply_settings(WorldSettings::synchronous(0.05))
            .await
            .unwrap();
        sim.configure_traffic_manager(8000, seed).await.unwrap();
        sim
    }

    #[test]
    fn test_pandora_split() {
        let mut lidar = GenerationConfig::default().rig.lidar;
        assert_eq!(lidar_units(&lidar).len(), 1);

        lidar.pandora = true;
        let units = lidar_units(&lidar);
        assert_eq!(units.len(), 3);
        assert_eq!(
            units.iter().map(|u| u.channels).collect::<Vec<_>>(),
            vec![5, 25, 10]
        );
        assert_eq!(
            units.iter().map(|u| u.points_per_cloud).sum::<u32>(),
            lidar.points_per_cloud
        );
        assert_eq!(units[2].lower_fov_deg, -16.0);
    }

    #[test]
    fn test_mount_height_clears_roof() {
        let extent = VehicleExtent {
            x: 2.0,
            y: 1.0,
            z: 0.75,
        };
        let t = mount_transform(extent, -45.0);
        assert!((t.location.z - (1.5 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ego_candidates_exclude_large_and_two_wheel() {
        let bps = vec![
            VehicleBlueprint {
                id: "vehicle.tesla.model3".into(),
                wheels: 4,
            },
            VehicleBlueprint {
                id: "vehicle.carlamotors.firetruck".into(),
                wheels: 4,
            },
            VehicleBlueprint {
                id: "vehicle.volkswagen.t2_2021".into(),
                wheels: 4,
            },
            VehicleBlueprint {
                id: "vehicle.yamaha.yzf".into(),
                wheels: 2,
            },
        ];
        let ids: Vec<_> = ego_candidates(&bps).iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["vehicle.tesla.model3"]);
    }

    #[tokio::test]
    async fn test_spawn_rig_success() {
        let sim = world(MockConfig::default(), 1).await;
        let mut rig_config = GenerationConfig::default().rig;
        rig_config.lidar.pandora = true;
        let factory = RigFactory::new(&sim, &rig_config, 20.0);

        let rig = factory.spawn_rig(1, true).await.unwrap();
        assert!(rig.ego.is_some());
        assert_eq!(rig.sensors.len(), 6);
        assert_eq!(rig.sensors_of(SensorKind::Lidar).count(), 3);
        assert_eq!(sim.actor_count(), 7);
    }

    #[tokio::test]
    async fn test_sensor_spawn_failure_rollback() {
        let config = MockConfig {
            fail_sensor_spawn: [(5, SensorKind::Rgb)].into_iter().collect(),
            ..Default::default()
        };
        let sim = world(config, 5).await;
        let rig_config = GenerationConfig::default().rig;
        let factory = RigFactory::new(&sim, &rig_config, 20.0);

        let err = factory.spawn_rig(5, true).await.unwrap_err();
        assert!(err.to_string().contains("rgb.0"), "got: {err}");
        assert_eq!(sim.actor_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_idempotent() {
        let sim = world(MockConfig::default(), 2).await;
        let rig_config = GenerationConfig::default().rig;
        let factory = RigFactory::new(&sim, &rig_config, 20.0);

        let rig = factory.spawn_rig(2, false).await.unwrap();
        factory.teardown(&rig).await;
        factory.teardown(&rig).await;
        assert_eq!(sim.actor_count(), 0);
    }

    #[test]
    fn test_sensor_specs_follow_tick_rate() {
        let sim = MockSimulator::new();
        let rig_config = GenerationConfig::default().rig;
        let factory = RigFactory::new(&sim, &rig_config, 20.0);
        let specs = factory.sensor_specs();
        assert_eq!(specs.len(), 4);
        let lidar = specs.iter().find(|s| s.kind == SensorKind::Lidar).unwrap();
        assert_eq!(lidar.attributes["rotation_frequency"], "20");
        assert_eq!(lidar.attributes["points_per_second"], "1400000");
        assert!(specs.iter().all(|s| s.attributes["sensor_tick"] == "0.0"));
    }
}
