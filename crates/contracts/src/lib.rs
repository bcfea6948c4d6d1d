//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the dataset generator:
//! sensor records, the per-sequence container, sequence descriptors, the
//! generation config and the shared error type.
//! Business crates depend only on this crate, never on each other's internals.
//!
//! ## Time Model
//! - Every sample carries the simulator clock (seconds, f64) at which it was produced
//! - Event timestamps inside a packet are nanoseconds of simulation time (i64)
//! - Wall-clock time never enters the recorded data

mod blueprint;
mod depth;
mod error;
mod runtime;
mod sensor;
mod sensor_source;
mod sequence;
mod sink;

pub use blueprint::*;
pub use depth::{decode_depth, encode_depth, DEPTH_MAX_METERS, DEPTH_RESOLUTION_METERS};
pub use error::*;
pub use runtime::*;
pub use sensor::*;
pub use sensor_source::{SensorDataCallback, SensorSource};
pub use sequence::*;
pub use sink::*;
