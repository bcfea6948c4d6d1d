//! SensorStreamCollector
//!
//! 四条独立的追加缓冲区，各自一把锁；帧流 (LiDAR / RGB / 深度) 每次追加都会唤醒
//! 等待屏障的 tick 循环。事件流不参与屏障。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{
    EventPacket, ImageFrame, LidarCloud, Sequence, SensorDataCallback, SensorKind, SensorPayload,
    SensorReading,
};
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::decode::check_bgra;
use crate::error::{IngestionError, Result};
use crate::metrics::{CollectorMetrics, MetricsSnapshot};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 单路图像帧流
#[derive(Debug, Default)]
struct FrameStream {
    frames: Vec<ImageFrame>,
    /// 最近一次追加的 (仿真帧号, production_time)
    last: Option<(u64, f64)>,
}

impl FrameStream {
    fn push(&mut self, kind: SensorKind, frame: u64, image: ImageFrame) -> Result<()> {
        check_order(kind, self.last, frame, image.production_time)?;
        self.last = Some((frame, image.production_time));
        self.frames.push(image);
        Ok(())
    }
}

fn check_order(kind: SensorKind, last: Option<(u64, f64)>, frame: u64, time: f64) -> Result<()> {
    let Some((last_frame, last_time)) = last else {
        return Ok(());
    };
    if frame <= last_frame {
        return Err(IngestionError::desync(
            kind,
            frame,
            format!("delivered again after frame {last_frame}"),
        ));
    }
    if time <= last_time {
        return Err(IngestionError::desync(
            kind,
            frame,
            format!("production time {time} not after {last_time}"),
        ));
    }
    Ok(())
}

#[derive(Debug)]
struct PartialCloud {
    /// 已到达子单元的位掩码
    seen: u32,
    cloud: LidarCloud,
}

/// LiDAR 流：同一仿真帧的子单元点云合并为一帧
#[derive(Debug)]
struct LidarStream {
    units: u8,
    pending: BTreeMap<u64, PartialCloud>,
    clouds: Vec<LidarCloud>,
    last: Option<(u64, f64)>,
}

impl LidarStream {
    fn new(units: u8) -> Self {
        Self {
            units: units.max(1),
            pending: BTreeMap::new(),
            clouds: Vec::new(),
            last: None,
        }
    }

    /// 返回该帧是否已合并完成
    fn push(&mut self, frame: u64, unit: u8, part: LidarCloud) -> Result<bool> {
        if unit >= self.units {
            return Err(IngestionError::desync(
                SensorKind::Lidar,
                frame,
                format!("unit {unit} outside a group of {}", self.units),
            ));
        }
        if let Some((last_frame, _)) = self.last {
            if frame <= last_frame {
                return Err(IngestionError::desync(
                    SensorKind::Lidar,
                    frame,
                    format!("delivered again after frame {last_frame}"),
                ));
            }
        }

        let entry = self.pending.entry(frame).or_insert_with(|| PartialCloud {
            seen: 0,
            cloud: LidarCloud {
                points: Vec::with_capacity(part.points.len() * self.units as usize),
                production_time: part.production_time,
            },
        });
        let bit = 1u32 << unit;
        if entry.seen & bit != 0 {
            return Err(IngestionError::desync(
                SensorKind::Lidar,
                frame,
                format!("unit {unit} delivered twice"),
            ));
        }
        entry.seen |= bit;
        entry.cloud.points.extend_from_slice(&part.points);

        if entry.seen.count_ones() < self.units as u32 {
            return Ok(false);
        }

        let Some(done) = self.pending.remove(&frame) else {
            return Ok(false);
        };
        check_order(SensorKind::Lidar, self.last, frame, done.cloud.production_time)?;
        // 更早的未完成帧不可能再完成
        self.pending.retain(|&f, _| f > frame);
        self.last = Some((frame, done.cloud.production_time));
        self.clouds.push(done.cloud);
        Ok(true)
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.clouds.clear();
    }
}

struct Shared {
    events: Mutex<Vec<EventPacket>>,
    lidar: Mutex<LidarStream>,
    rgb: Mutex<FrameStream>,
    depth: Mutex<FrameStream>,
    /// 第一次检测到的失步或坏帧
    desync: Mutex<Option<IngestionError>>,
    frame_appended: Notify,
    metrics: CollectorMetrics,
}

impl Shared {
    fn accept(&self, kind: SensorKind, reading: SensorReading) {
        if reading.payload.kind() != kind {
            self.metrics.record_mismatched();
            warn!(
                expected = %kind,
                got = %reading.payload.kind(),
                frame = reading.frame,
                "reading routed to the wrong stream, dropped"
            );
            return;
        }

        let frame = reading.frame;
        let result = match reading.payload {
            SensorPayload::Events(packet) => {
                lock(&self.events).push(packet);
                self.metrics.record_appended(SensorKind::Events);
                return;
            }
            SensorPayload::Lidar(part) => lock(&self.lidar).push(frame, reading.unit, part),
            SensorPayload::Rgb(image) => check_bgra(kind, image.width, image.height, &image.pixels)
                .and_then(|()| lock(&self.rgb).push(kind, frame, image))
                .map(|()| true),
            SensorPayload::Depth(image) => check_bgra(kind, image.width, image.height, &image.pixels)
                .and_then(|()| lock(&self.depth).push(kind, frame, image))
                .map(|()| true),
        };

        match result {
            Ok(true) => {
                self.metrics.record_appended(kind);
                trace!(sensor = %kind, frame, "frame appended");
            }
            Ok(false) => return,
            Err(e) => {
                match e {
                    IngestionError::FrameDesync { .. } => self.metrics.record_out_of_order(kind),
                    IngestionError::PayloadDecode { .. } => self.metrics.record_malformed(kind),
                }
                warn!(error = %e, "frame rejected");
                lock(&self.desync).get_or_insert(e);
            }
        }
        self.frame_appended.notify_waiters();
    }
}

/// 传感器流收集器
///
/// 克隆共享同一组缓冲区；回调在仿真器线程上并发调用。
#[derive(Clone)]
pub struct SensorStreamCollector {
    shared: Arc<Shared>,
}

impl SensorStreamCollector {
    /// `lidar_units` 为 LiDAR 组内子单元数 (单个 LiDAR 为 1)
    pub fn new(lidar_units: u8) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(Vec::new()),
                lidar: Mutex::new(LidarStream::new(lidar_units)),
                rgb: Mutex::new(FrameStream::default()),
                depth: Mutex::new(FrameStream::default()),
                desync: Mutex::new(None),
                frame_appended: Notify::new(),
                metrics: CollectorMetrics::new(),
            }),
        }
    }

    /// 为 `kind` 流生成回调
    pub fn callback(&self, kind: SensorKind) -> SensorDataCallback {
        let shared = self.shared.clone();
        Arc::new(move |reading| shared.accept(kind, reading))
    }

    /// 当前已交付的样本数 (LiDAR 只计合并完成的点云)
    pub fn delivered(&self, kind: SensorKind) -> usize {
        match kind {
            SensorKind::Events => lock(&self.shared.events).len(),
            SensorKind::Lidar => lock(&self.shared.lidar).clouds.len(),
            SensorKind::Rgb => lock(&self.shared.rgb).frames.len(),
            SensorKind::Depth => lock(&self.shared.depth).frames.len(),
        }
    }

    /// 三路帧流是否都至少交付了 `tick_count` 帧
    pub fn frames_ready(&self, tick_count: usize) -> bool {
        SensorKind::FRAME_SENSORS
            .into_iter()
            .all(|kind| self.delivered(kind) >= tick_count)
    }

    /// 尚未交付第 `tick_count` 帧的帧流
    pub fn missing_for(&self, tick_count: usize) -> Vec<SensorKind> {
        SensorKind::FRAME_SENSORS
            .into_iter()
            .filter(|&kind| self.delivered(kind) < tick_count)
            .collect()
    }

    /// 等待帧屏障：三路帧流都交付 `tick_count` 帧，或检测到失步
    ///
    /// 不带超时，调用方用 `tokio::time::timeout` 包裹。
    pub async fn wait_for_frames(&self, tick_count: usize) {
        loop {
            let notified = self.shared.frame_appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.frames_ready(tick_count) || lock(&self.shared.desync).is_some() {
                return;
            }
            notified.await;
        }
    }

    /// 屏障通过后检查：无失步，且每路恰好 `tick_count` 帧
    pub fn check_frames(&self, tick_count: usize) -> Result<()> {
        if let Some(e) = lock(&self.shared.desync).clone() {
            return Err(e);
        }
        for kind in SensorKind::FRAME_SENSORS {
            let delivered = self.delivered(kind);
            if delivered > tick_count {
                return Err(IngestionError::desync(
                    kind,
                    tick_count as u64,
                    format!("{delivered} frames delivered for {tick_count} ticks"),
                ));
            }
        }
        Ok(())
    }

    /// 丢弃已收集的数据 (预热结束后调用)
    ///
    /// 保留各帧流的最近帧号，重复交付仍会被检测到。
    pub fn reset(&self) {
        lock(&self.shared.events).clear();
        lock(&self.shared.lidar).clear();
        lock(&self.shared.rgb).frames.clear();
        lock(&self.shared.depth).frames.clear();
        lock(&self.shared.desync).take();
    }

    /// 取出全部缓冲区，生成序列
    ///
    /// 调用前应停止所有传感器；之后到达的读数会进入新的空缓冲区。
    pub fn freeze(&self) -> Sequence {
        let lidar = {
            let mut stream = lock(&self.shared.lidar);
            stream.pending.clear();
            std::mem::take(&mut stream.clouds)
        };
        Sequence {
            events: std::mem::take(&mut *lock(&self.shared.events)),
            lidar,
            rgb: std::mem::take(&mut lock(&self.shared.rgb).frames),
            depth: std::mem::take(&mut lock(&self.shared.depth).frames),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}
