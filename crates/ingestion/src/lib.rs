//! # Ingestion
//!
//! Sensor stream collection for one sequence.
//!
//! Responsibilities:
//! - Wire every rig sensor into a `SensorStreamCollector` through `SensorSource` callbacks
//! - Keep four independently locked append-only buffers (events, LiDAR, RGB, depth)
//! - Frame barrier readiness for the tick loop; the event stream never takes part
//! - Merge LiDAR sub-unit clouds of the same simulator frame
//! - Detect duplicate and out-of-order frame delivery
//! - Decode raw simulator payloads
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{SensorSet, SensorStreamCollector};
//!
//! let collector = SensorStreamCollector::new(lidar_units);
//! sensors.listen_all(&collector);
//!
//! for tick in 1..=n {
//!     client.tick().await?;
//!     timeout(barrier, collector.wait_for_frames(tick)).await?;
//!     collector.check_frames(tick)?;
//! }
//! sensors.stop_all();
//! let sequence = collector.freeze();
//! ```

mod collector;
mod decode;
mod error;
mod metrics;
mod sources;

pub use collector::SensorStreamCollector;
pub use decode::{check_bgra, decode_events, decode_lidar, encode_events};
pub use error::{IngestionError, Result};
pub use metrics::{CollectorMetrics, MetricsSnapshot};
pub use sources::SensorSet;
