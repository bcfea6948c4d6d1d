//! # Sync Engine
//!
//! 单序列仿真驱动。
//!
//! 负责：
//! - 持有唯一的仿真器连接，连接与断线重连
//! - 搭建世界：地图、同步模式、交通管理器种子、天气、背景交通、传感器 rig
//! - 逐 tick 推进并等待帧屏障 (LiDAR / RGB / 深度)，事件流不参与
//! - 预热、红灯放行、冻结与校验序列
//! - 无论成功失败都拆除 rig 并恢复异步模式
//!
//! ## 使用示例
//!
//! ```ignore
//! use sync_engine::SimulationDriver;
//!
//! let mut driver = SimulationDriver::new(MockSimulator::new(), config);
//! driver.connect().await?;
//! let sequence = driver.run(&descriptor).await?;
//! ```

mod driver;

pub use driver::SimulationDriver;
