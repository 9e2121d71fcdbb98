//! Frame pacing engine.
//!
//! The engine owns the path from an accepted frame to bytes on the bus:
//! the bounded keep-latest buffer the forwarder feeds, the fixed-cadence
//! dispatcher that drains it, the pure canvas-to-panel mapper, and the
//! per-panel dirty cache that suppresses redundant writes.

pub mod buffer;
pub mod dirty;
pub mod dispatcher;
pub mod mapper;

pub use buffer::{BufferEntry, FrameBuffer};
pub use dirty::{payload_hash, PanelCache};
pub use dispatcher::{EngineStats, Pacer, PacerCommand, PacerHandle, PacerState};
pub use mapper::{map, unmap, PanelPayload};
