//! SimulationDriver: one sequence per `run`

use std::time::{Duration, Instant};

use actor_factory::{
    release_red_lights, RigFactory, SimulatorClient, Traffic, TrafficSpawner, WorldSettings,
};
use contracts::{ContractError, GenerationConfig, RigHandles, Sequence, SequenceDescriptor};
use ingestion::{SensorSet, SensorStreamCollector};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, ContractError>;

/// 录制阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Record,
}

/// 仿真驱动
///
/// 持有唯一的仿真器句柄；同一时间只运行一个序列。
pub struct SimulationDriver<C: SimulatorClient> {
    client: C,
    config: GenerationConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: SimulatorClient> SimulationDriver<C> {
    pub fn new(client: C, config: GenerationConfig) -> Self {
        Self {
            client,
            config,
            cancel: None,
        }
    }

    /// 协作取消：通道值变为 `true` 时当前序列以 `Cancelled` 结束
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    #[instrument(
        name = "driver_connect",
        skip(self),
        fields(host = %self.config.simulator.host, port = self.config.simulator.port)
    )]
    pub async fn connect(&mut self) -> Result<()> {
        let sim = &self.config.simulator;
        let timeout = Duration::from_secs_f64(sim.connect_timeout_secs);
        self.client
            .connect(&sim.host, sim.port, timeout)
            .await
            .map_err(ContractError::from)?;
        info!("connected to simulator");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// 连接丢失时重连；返回是否发生了重连
    pub async fn reconnect_if_needed(&mut self) -> Result<bool> {
        if self.client.is_connected() {
            return Ok(false);
        }
        warn!("simulator connection lost, reconnecting");
        self.connect().await?;
        Ok(true)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// 运行一个序列
    ///
    /// 成功时返回已冻结并校验过的序列。任何失败都丢弃部分数据；
    /// rig 与背景交通总会被拆除。
    #[instrument(
        name = "driver_run",
        skip(self, descriptor),
        fields(seed = descriptor.seed, map = %descriptor.map_name)
    )]
    pub async fn run(&self, descriptor: &SequenceDescriptor) -> Result<Sequence> {
        if self.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        let started = Instant::now();

        self.prepare_world(descriptor).await?;

        let mut traffic = Traffic::default();
        let mut rig = RigHandles::new();
        let result = self.record(descriptor, &mut traffic, &mut rig).await;
        self.teardown(&traffic, &rig).await;

        match &result {
            Ok(sequence) => info!(
                ticks = sequence.lidar.len(),
                event_packets = sequence.events.len(),
                took_ms = started.elapsed().as_millis() as u64,
                "sequence recorded"
            ),
            Err(e) => warn!(error = %e, "sequence aborted"),
        }
        result
    }

    /// 地图、同步模式、交通管理器种子、天气
    async fn prepare_world(&self, descriptor: &SequenceDescriptor) -> Result<()> {
        let sim = &self.config.simulation;
        self.client
            .load_world(&descriptor.map_name)
            .await
            .map_err(ContractError::from)?;
        self.client
            .apply_settings(WorldSettings::synchronous(sim.tick_interval()))
            .await
            .map_err(ContractError::from)?;
        self.client
            .configure_traffic_manager(self.config.simulator.traffic_manager_port, descriptor.seed)
            .await
            .map_err(ContractError::from)?;
        self.client
            .set_weather(descriptor.weather)
            .await
            .map_err(ContractError::from)?;
        debug!(tick_interval = sim.tick_interval(), "world prepared");
        Ok(())
    }

    async fn record(
        &self,
        descriptor: &SequenceDescriptor,
        traffic: &mut Traffic,
        rig: &mut RigHandles,
    ) -> Result<Sequence> {
        let sim = &self.config.simulation;

        *traffic = TrafficSpawner::new(&self.client)
            .spawn(descriptor.seed, sim.vehicles, sim.pedestrians)
            .await
            .map_err(ContractError::from)?;

        *rig = RigFactory::new(&self.client, &self.config.rig, sim.tick_hz)
            .spawn_rig(descriptor.seed, sim.autopilot)
            .await
            .map_err(ContractError::from)?;
        let ego = rig
            .ego
            .ok_or_else(|| ContractError::spawn_failed("ego", "rig has no ego vehicle"))?;

        let collector = SensorStreamCollector::new(self.config.rig.lidar.units());
        let mut sensors = SensorSet::new();
        for sensor in &rig.sensors {
            let name = format!("{}.{}", sensor.kind, sensor.unit);
            let source = self
                .client
                .get_sensor_source(sensor.actor_id, name.clone(), sensor.kind, sensor.unit)
                .ok_or_else(|| ContractError::spawn_failed(name, "sensor source unavailable"))?;
            sensors.register(source);
        }
        sensors.listen_all(&collector);

        let mut pedestrians_started = false;
        let warmup = sim.warmup_ticks() as usize;
        for tick in 1..=warmup {
            self.step(&collector, tick, Phase::Warmup).await?;
            if !pedestrians_started {
                self.client
                    .start_pedestrians()
                    .await
                    .map_err(ContractError::from)?;
                pedestrians_started = true;
            }
        }
        collector.reset();
        debug!(warmup, "warm-up done");

        let ticks = sim.recorded_ticks() as usize;
        for tick in 1..=ticks {
            let waited = self.step(&collector, tick, Phase::Record).await?;
            observability::record_tick(waited);

            if !pedestrians_started {
                self.client
                    .start_pedestrians()
                    .await
                    .map_err(ContractError::from)?;
                pedestrians_started = true;
            }
            if sim.release_red_lights {
                release_red_lights(&self.client, ego, &traffic.vehicles)
                    .await
                    .map_err(ContractError::from)?;
            }
        }

        sensors.stop_all();
        let sequence = collector.freeze();
        sequence.validate(ticks as u64, sim.tick_interval())?;
        Ok(sequence)
    }

    /// 推进一个 tick 并等待帧屏障，返回屏障等待时间
    async fn step(
        &self,
        collector: &SensorStreamCollector,
        tick: usize,
        phase: Phase,
    ) -> Result<Duration> {
        if self.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        self.client.tick().await.map_err(ContractError::from)?;

        let barrier = self.config.simulation.barrier_timeout();
        let started = Instant::now();
        let waited = tokio::select! {
            waited = tokio::time::timeout(barrier, collector.wait_for_frames(tick)) => waited,
            _ = cancelled(self.cancel.clone()) => return Err(ContractError::Cancelled),
        };

        if waited.is_err() {
            // 服务端崩溃表现为传感器停止交付
            if !self.client.is_connected() {
                return Err(ContractError::connection_lost(format!(
                    "connection dropped while waiting for tick {tick}"
                )));
            }
            let missing = collector.missing_for(tick);
            warn!(?phase, tick, ?missing, "frame barrier timed out");
            return Err(ContractError::SimulationTimeout {
                tick: tick as u64,
                waited_ms: started.elapsed().as_millis() as u64,
                missing,
            });
        }

        collector
            .check_frames(tick)
            .map_err(|e| e.into_contract(tick as u64))?;
        Ok(started.elapsed())
    }

    /// 拆除 rig 与背景交通，恢复异步模式
    async fn teardown(&self, traffic: &Traffic, rig: &RigHandles) {
        if !self.client.is_connected() {
            debug!("connection lost, actors went with the server");
            return;
        }
        RigFactory::new(&self.client, &self.config.rig, self.config.simulation.tick_hz)
            .teardown(rig)
            .await;
        TrafficSpawner::new(&self.client).teardown(traffic).await;

        if let Err(e) = self
            .client
            .apply_settings(WorldSettings::asynchronous())
            .await
        {
            warn!(error = %e, "failed to restore asynchronous mode");
        }
    }
}

/// 取消信号到达时完成；发送端已关闭则永不完成
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = cancel {
        if rx.wait_for(|&c| c).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
