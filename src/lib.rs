//! Multi-owner nearest-sensor engine.
//!
//! Every frame the engine builds one linear BVH per "owner" (an independent
//! group of up to a power-of-two sensors) and answers, for every sensor, the
//! closest sensor belonging to a *different* owner within a search radius.
//! The build and query run as wgpu compute dispatches when an adapter is
//! available; a CPU pipeline with identical pass structure and buffer
//! layouts backs headless machines and the test suite.
//!
//! Results are one frame stale by design: a frame's output becomes readable
//! only after the next [`network::SensorGridNetwork::end_frame`] swaps the
//! read-side owner mapping in.

pub mod accel;
pub mod error;
pub mod gpu;
pub mod layout;
pub mod morton;
pub mod network;
pub mod types;

pub use accel::{set_build_disabled, BackendKind};
pub use error::{GridResult, SensorGridError};
pub use network::{set_radius_override, InstanceId, SensorGridNetwork};
pub use types::{Aabb, InternalNode, NearestHit, SensorGridConfig, SensorInfo, SensorSlot};
