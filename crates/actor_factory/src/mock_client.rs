//! Mock 仿真器客户端
//!
//! 不依赖真实仿真器的同步模式世界：每次 `tick` 推进固定步长，并通过通道
//! 通知所有正在监听的 mock 传感器。支持按种子注入一次性故障
//! (断连、传感器停顿、重复帧、传感器 spawn 失败)。
//!
//! `MockSimulator` 内部状态共享 (`Arc`)，测试可以保留一个克隆用于检查。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use contracts::{
    ActorId, Location, Rotation, SensorKind, SensorSource, Transform, VehicleExtent, WeatherSpec,
};
use tracing::{debug, instrument, warn};

use crate::client::{
    SimulatorClient, SpawnedVehicle, VehicleBlueprint, VehicleState, WorldSettings, WorldTick,
};
use crate::error::{ActorFactoryError, Result};
use crate::mock_sensor::{MockSensor, MockSensorConfig, TickAction, TickMsg};

/// Mock 仿真器配置 (可注入失败场景)
///
/// 以种子为键的故障只触发一次；tick 序号从加载地图后的第一个 tick 记为 1。
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// 前 N 次连接被拒绝
    pub refuse_connects: u32,
    /// seed -> 在该 tick 断开连接 (模拟服务端崩溃)
    pub disconnect_at: HashMap<u64, u64>,
    /// seed -> (传感器, tick)：该传感器在该 tick 不交付数据
    pub stall_at: HashMap<u64, (SensorKind, u64)>,
    /// seed -> (传感器, tick)：该传感器在该 tick 交付两次
    pub duplicate_at: HashMap<u64, (SensorKind, u64)>,
    /// seed -> 该类传感器 spawn 失败
    pub fail_sensor_spawn: HashMap<u64, SensorKind>,
    /// 地图上的车辆出生点数量
    pub spawn_points: usize,
    /// 红灯周期 (tick)；`None` 表示从不遇到红灯
    pub red_light_period: Option<u64>,
    /// 事件相机每 tick 的最大包数
    pub max_event_packets: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            refuse_connects: 0,
            disconnect_at: HashMap::new(),
            stall_at: HashMap::new(),
            duplicate_at: HashMap::new(),
            fail_sensor_spawn: HashMap::new(),
            spawn_points: 120,
            red_light_period: Some(40),
            max_event_packets: 3,
        }
    }
}

#[derive(Debug)]
enum MockActor {
    Vehicle {
        spawn_point: usize,
        extent: VehicleExtent,
        autopilot: bool,
    },
    Pedestrian,
    Sensor {
        kind: SensorKind,
        attributes: HashMap<String, String>,
        tx: async_channel::Sender<TickMsg>,
        rx: async_channel::Receiver<TickMsg>,
        listening: Arc<AtomicBool>,
    },
}

#[derive(Debug)]
struct WorldState {
    config: MockConfig,
    connected: bool,
    connections: u32,
    map: Option<String>,
    settings: WorldSettings,
    traffic_seed: Option<u64>,
    weather: Option<WeatherSpec>,
    frame: u64,
    ticks_since_load: u64,
    elapsed: f64,
    next_actor_id: ActorId,
    actors: HashMap<ActorId, MockActor>,
    pedestrians_started: bool,
    forced_green: u32,
    /// (vehicle, tick) 已被切换为绿灯
    green_until: HashMap<ActorId, u64>,
}

impl WorldState {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ActorFactoryError::connection("not connected"))
        }
    }

    fn allocate_actor_id(&mut self) -> ActorId {
        let id = self.next_actor_id;
        self.next_actor_id += 1;
        id
    }

    fn seed(&self) -> u64 {
        self.traffic_seed.unwrap_or_default()
    }

    fn delta(&self) -> f64 {
        self.settings.fixed_delta_seconds.unwrap_or(0.05)
    }

    /// 服务端崩溃或换图：所有 actor 消失，传感器通道随之关闭
    fn drop_world(&mut self) {
        self.actors.clear();
        self.green_until.clear();
        self.pedestrians_started = false;
    }

    fn take_injection(map: &mut HashMap<u64, (SensorKind, u64)>, seed: u64, tick: u64) -> Option<SensorKind> {
        match map.get(&seed) {
            Some(&(kind, at)) if at == tick => {
                map.remove(&seed);
                Some(kind)
            }
            _ => None,
        }
    }

    fn at_red_light(&self, actor_id: ActorId) -> bool {
        let Some(period) = self.config.red_light_period else {
            return false;
        };
        if self
            .green_until
            .get(&actor_id)
            .is_some_and(|&until| self.ticks_since_load <= until)
        {
            return false;
        }
        period > 0 && (self.ticks_since_load + actor_id as u64) % period == 0
    }
}

/// Mock 仿真器客户端
#[derive(Debug, Clone)]
pub struct MockSimulator {
    world: Arc<Mutex<WorldState>>,
}

impl MockSimulator {
    /// 创建默认 mock 仿真器
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// 使用配置创建 mock 仿真器
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            world: Arc::new(Mutex::new(WorldState {
                config,
                connected: false,
                connections: 0,
                map: None,
                settings: WorldSettings::asynchronous(),
                traffic_seed: None,
                weather: None,
                frame: 0,
                ticks_since_load: 0,
                elapsed: 0.0,
                // 从 1000 开始，便于识别
                next_actor_id: 1000,
                actors: HashMap::new(),
                pedestrians_started: false,
                forced_green: 0,
                green_until: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 当前存活的 actor 数量
    pub fn actor_count(&self) -> usize {
        self.state().actors.len()
    }

    pub fn sensor_count(&self) -> usize {
        self.state()
            .actors
            .values()
            .filter(|a| matches!(a, MockActor::Sensor { .. }))
            .count()
    }

    /// 成功建立过的连接次数
    pub fn connections(&self) -> u32 {
        self.state().connections
    }

    pub fn current_map(&self) -> Option<String> {
        self.state().map.clone()
    }

    pub fn settings(&self) -> WorldSettings {
        self.state().settings
    }

    pub fn traffic_seed(&self) -> Option<u64> {
        self.state().traffic_seed
    }

    pub fn weather(&self) -> Option<WeatherSpec> {
        self.state().weather
    }

    pub fn pedestrians_started(&self) -> bool {
        self.state().pedestrians_started
    }

    /// 被强制切绿的红灯次数
    pub fn forced_green_count(&self) -> u32 {
        self.state().forced_green
    }

    /// 模拟服务端崩溃
    pub fn crash(&self) {
        let mut st = self.state();
        st.connected = false;
        st.drop_world();
    }
}

impl Default for MockSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorClient for MockSimulator {
    #[instrument(name = "mock_sim_connect", skip(self, timeout), fields(host = %host, port))]
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let _ = timeout;
        let mut st = self.state();
        if st.config.refuse_connects > 0 {
            st.config.refuse_connects -= 1;
            return Err(ActorFactoryError::connection(format!(
                "connection to {host}:{port} refused"
            )));
        }
        st.connected = true;
        st.connections += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    #[instrument(name = "mock_sim_load_world", skip(self), fields(map = %map))]
    async fn load_world(&self, map: &str) -> Result<()> {
        let mut st = self.state();
        st.ensure_connected()?;
        st.drop_world();
        st.map = Some(map.to_string());
        st.ticks_since_load = 0;
        Ok(())
    }

    async fn apply_settings(&self, settings: WorldSettings) -> Result<()> {
        let mut st = self.state();
        st.ensure_connected()?;
        st.settings = settings;
        Ok(())
    }

    async fn configure_traffic_manager(&self, port: u16, seed: u64) -> Result<()> {
        let mut st = self.state();
        st.ensure_connected()?;
        debug!(port, seed, "mock traffic manager configured");
        st.traffic_seed = Some(seed);
        Ok(())
    }

    async fn set_weather(&self, weather: WeatherSpec) -> Result<()> {
        let mut st = self.state();
        st.ensure_connected()?;
        st.weather = Some(weather);
        Ok(())
    }

    fn spawn_point_count(&self) -> Result<usize> {
        let st = self.state();
        st.ensure_connected()?;
        Ok(st.config.spawn_points)
    }

    fn vehicle_blueprints(&self) -> Result<Vec<VehicleBlueprint>> {
        self.state().ensure_connected()?;
        Ok([
            ("vehicle.tesla.model3", 4),
            ("vehicle.audi.a2", 4),
            ("vehicle.mini.cooper_s", 4),
            ("vehicle.carlamotors.firetruck", 4),
            ("vehicle.yamaha.yzf", 2),
        ]
        .iter()
        .map(|(id, wheels)| VehicleBlueprint {
            id: id.to_string(),
            wheels: *wheels,
        })
        .collect())
    }

    fn pedestrian_blueprints(&self) -> Result<Vec<String>> {
        self.state().ensure_connected()?;
        Ok(vec![
            "walker.pedestrian.0001".to_string(),
            "walker.pedestrian.0002".to_string(),
        ])
    }

    #[instrument(name = "mock_sim_spawn_vehicle", skip(self), fields(blueprint = %blueprint))]
    async fn spawn_vehicle(
        &self,
        blueprint: &str,
        spawn_point: usize,
        autopilot: bool,
    ) -> Result<Option<SpawnedVehicle>> {
        let mut st = self.state();
        st.ensure_connected()?;
        if spawn_point >= st.config.spawn_points {
            return Err(ActorFactoryError::vehicle_spawn(
                blueprint,
                format!("spawn point {spawn_point} out of range"),
            ));
        }
        let occupied = st.actors.values().any(|a| {
            matches!(a, MockActor::Vehicle { spawn_point: p, .. } if *p == spawn_point)
        });
        if occupied {
            return Ok(None);
        }

        let actor_id = st.allocate_actor_id();
        let extent = VehicleExtent {
            x: 2.4,
            y: 1.0,
            z: 0.75,
        };
        st.actors.insert(
            actor_id,
            MockActor::Vehicle {
                spawn_point,
                extent,
                autopilot,
            },
        );
        Ok(Some(SpawnedVehicle { actor_id, extent }))
    }

    async fn spawn_pedestrian(&self, blueprint: &str) -> Result<Option<ActorId>> {
        let _ = blueprint;
        let mut st = self.state();
        st.ensure_connected()?;
        let actor_id = st.allocate_actor_id();
        st.actors.insert(actor_id, MockActor::Pedestrian);
        Ok(Some(actor_id))
    }

    async fn start_pedestrians(&self) -> Result<()> {
        let mut st = self.state();
        st.ensure_connected()?;
        if st.frame == 0 {
            warn!("pedestrian controllers started before the first tick");
        }
        st.pedestrians_started = true;
        Ok(())
    }

    #[instrument(
        name = "mock_sim_spawn_sensor",
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
        let _ = transform;
        let mut st = self.state();
        st.ensure_connected()?;

        // 验证 parent 存在
        if !st.actors.contains_key(&parent_id) {
            return Err(ActorFactoryError::sensor_spawn(
                blueprint,
                format!("actor_{parent_id}"),
                "parent actor not found",
            ));
        }

        let kind = SensorKind::ALL
            .into_iter()
            .find(|k| k.blueprint() == blueprint)
            .ok_or_else(|| {
                ActorFactoryError::sensor_spawn(
                    blueprint,
                    format!("actor_{parent_id}"),
                    "unknown sensor blueprint",
                )
            })?;

        let seed = st.seed();
        if st.config.fail_sensor_spawn.get(&seed) == Some(&kind) {
            st.config.fail_sensor_spawn.remove(&seed);
            return Err(ActorFactoryError::sensor_spawn(
                blueprint,
                format!("actor_{parent_id}"),
                "mock failure",
            ));
        }

        let (tx, rx) = async_channel::unbounded();
        let actor_id = st.allocate_actor_id();
        st.actors.insert(
            actor_id,
            MockActor::Sensor {
                kind,
                attributes: attributes.clone(),
                tx,
                rx,
                listening: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(actor_id)
    }

    #[instrument(name = "mock_sim_destroy_actor", skip(self), fields(actor_id))]
    async fn destroy_actor(&self, actor_id: ActorId) -> Result<()> {
        // 幂等：即使不存在也返回 Ok；连接断开后服务端已回收全部 actor
        let mut st = self.state();
        if let Some(MockActor::Sensor { listening, .. }) = st.actors.remove(&actor_id) {
            listening.store(false, Ordering::SeqCst);
        }
        st.green_until.remove(&actor_id);
        Ok(())
    }

    async fn actor_exists(&self, actor_id: ActorId) -> Result<bool> {
        Ok(self.state().actors.contains_key(&actor_id))
    }

    #[instrument(name = "mock_sim_tick", skip(self))]
    async fn tick(&self) -> Result<WorldTick> {
        let mut st = self.state();
        st.ensure_connected()?;

        let delta = st.delta();
        st.frame += 1;
        st.ticks_since_load += 1;
        st.elapsed += delta;

        let seed = st.seed();
        let tick = st.ticks_since_load;

        if st.config.disconnect_at.get(&seed) == Some(&tick) {
            st.config.disconnect_at.remove(&seed);
            warn!(seed, tick, "mock simulator crashed");
            st.connected = false;
            st.drop_world();
            return Err(ActorFactoryError::connection("simulator stopped responding"));
        }

        let stalled = WorldState::take_injection(&mut st.config.stall_at, seed, tick);
        let duplicated = WorldState::take_injection(&mut st.config.duplicate_at, seed, tick);

        let (frame, elapsed) = (st.frame, st.elapsed);
        for actor in st.actors.values() {
            if let MockActor::Sensor {
                kind,
                tx,
                listening,
                ..
            } = actor
            {
                if !listening.load(Ordering::SeqCst) {
                    continue;
                }
                let action = if stalled == Some(*kind) {
                    TickAction::Skip
                } else if duplicated == Some(*kind) {
                    TickAction::Duplicate
                } else {
                    TickAction::Deliver
                };
                let msg = TickMsg {
                    frame,
                    elapsed_seconds: elapsed,
                    delta_seconds: delta,
                    seed,
                    action,
                };
                // 无界通道，只有接收端全部消失时失败
                let _ = tx.try_send(msg);
            }
        }

        Ok(WorldTick {
            frame,
            elapsed_seconds: elapsed,
        })
    }

    async fn vehicle_state(&self, actor_id: ActorId) -> Result<VehicleState> {
        let st = self.state();
        st.ensure_connected()?;
        match st.actors.get(&actor_id) {
            Some(MockActor::Vehicle {
                spawn_point,
                autopilot,
                ..
            }) => {
                // 车辆沿 x 轴排开，开启自动驾驶的车辆以 10 m/s 前进
                let speed = if *autopilot { 10.0 } else { 0.0 };
                let x = *spawn_point as f64 * 8.0 + speed * st.elapsed;
                Ok(VehicleState {
                    transform: Transform {
                        location: Location { x, y: 0.0, z: 0.0 },
                        rotation: Rotation::default(),
                    },
                    at_red_light: st.at_red_light(actor_id),
                })
            }
            _ => Err(ActorFactoryError::vehicle_spawn(
                format!("actor_{actor_id}"),
                "vehicle not found",
            )),
        }
    }

    async fn force_green(&self, actor_id: ActorId, green_time: Duration) -> Result<bool> {
        let mut st = self.state();
        st.ensure_connected()?;
        if !st.at_red_light(actor_id) {
            return Ok(false);
        }
        let green_ticks = (green_time.as_secs_f64() / st.delta()).ceil() as u64;
        let until = st.ticks_since_load + green_ticks;
        st.green_until.insert(actor_id, until);
        st.forced_green += 1;
        Ok(true)
    }

    fn get_sensor_source(
        &self,
        actor_id: ActorId,
        sensor_id: String,
        kind: SensorKind,
        unit: u8,
    ) -> Option<Box<dyn SensorSource>> {
        let st = self.state();
        match st.actors.get(&actor_id) {
            Some(MockActor::Sensor {
                kind: actual,
                attributes,
                rx,
                listening,
                ..
            }) if *actual == kind => {
                let mut config = MockSensorConfig::from_attributes(attributes);
                config.max_event_packets = st.config.max_event_packets;
                Some(Box::new(MockSensor::new(
                    sensor_id,
                    kind,
                    unit,
                    config,
                    rx.clone(),
                    listening.clone(),
                )))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn connected() -> MockSimulator {
        let mut sim = MockSimulator::new();
        sim.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town01").await.unwrap();
        sim.apply_settings(WorldSettings::synchronous(0.05))
            .await
            .unwrap();
        sim
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let mut sim = MockSimulator::with_config(MockConfig {
            refuse_connects: 1,
            ..Default::default()
        });
        assert!(sim
            .connect("localhost", 2000, Duration::from_secs(1))
            .await
            .is_err());
        assert!(sim
            .connect("localhost", 2000, Duration::from_secs(1))
            .await
            .is_ok());
        assert_eq!(sim.connections(), 1);
    }

    #[tokio::test]
    async fn test_occupied_spawn_point_returns_none() {
        let sim = connected().await;
        let first = sim.spawn_vehicle("vehicle.audi.a2", 3, true).await.unwrap();
        assert!(first.is_some());
        let second = sim.spawn_vehicle("vehicle.audi.a2", 3, true).await.unwrap();
        assert!(second.is_none());
        assert_eq!(sim.actor_count(), 1);
    }

    #[tokio::test]
    async fn test_tick_advances_fixed_clock() {
        let sim = connected().await;
        let t1 = sim.tick().await.unwrap();
        let t2 = sim.tick().await.unwrap();
        assert_eq!(t2.frame, t1.frame + 1);
        assert!((t2.elapsed_seconds - t1.elapsed_seconds - 0.05).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_listening_sensor_receives_ticks() {
        let sim = connected().await;
        let ego = sim
            .spawn_vehicle("vehicle.audi.a2", 0, true)
            .await
            .unwrap()
            .unwrap();
        let attrs: HashMap<String, String> = [("image_size_x", "8"), ("image_size_y", "4")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sensor_id = sim
            .spawn_sensor("sensor.camera.rgb", Transform::default(), ego.actor_id, &attrs)
            .await
            .unwrap();
        let source = sim
            .get_sensor_source(sensor_id, "rgb".into(), SensorKind::Rgb, 0)
            .unwrap();
        // Wrong kind is rejected
        assert!(sim
            .get_sensor_source(sensor_id, "rgb".into(), SensorKind::Lidar, 0)
            .is_none());

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        source.listen(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..3 {
            sim.tick().await.unwrap();
        }
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        sim.destroy_actor(sensor_id).await.unwrap();
        sim.destroy_actor(sensor_id).await.unwrap();
        assert_eq!(sim.sensor_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_injection_fires_once() {
        let mut sim = MockSimulator::with_config(MockConfig {
            disconnect_at: [(9, 2)].into_iter().collect(),
            ..Default::default()
        });
        sim.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town02").await.unwrap();
        sim.configure_traffic_manager(8000, 9).await.unwrap();
        sim.tick().await.unwrap();
        assert!(sim.tick().await.is_err());
        assert!(!sim.is_connected());
        assert!(sim.tick().await.is_err());

        sim.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town02").await.unwrap();
        sim.configure_traffic_manager(8000, 9).await.unwrap();
        sim.tick().await.unwrap();
        sim.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_force_green_only_at_red() {
        let sim = MockSimulator::with_config(MockConfig {
            red_light_period: Some(1),
            ..Default::default()
        });
        let mut sim2 = sim.clone();
        sim2.connect("localhost", 2000, Duration::from_secs(1))
            .await
            .unwrap();
        sim.load_world("Town01").await.unwrap();
        let v = sim
            .spawn_vehicle("vehicle.audi.a2", 0, true)
            .await
            .unwrap()
            .unwrap();
        sim.tick().await.unwrap();
        assert!(sim.vehicle_state(v.actor_id).await.unwrap().at_red_light);
        assert!(sim
            .force_green(v.actor_id, Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!sim.vehicle_state(v.actor_id).await.unwrap().at_red_light);
        assert!(!sim
            .force_green(v.actor_id, Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(sim.forced_green_count(), 1);
    }
}
