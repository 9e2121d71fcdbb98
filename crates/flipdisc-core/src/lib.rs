//! Shared model for the flipdisc server.
//!
//! Everything the other crates agree on lives here: the canvas/panel/
//! topology types, the typed error, the declarative display configuration
//! (plus the process-wide runtime snapshot handle), and the statistics
//! snapshot that crosses the control-plane boundary.

pub mod config;
pub mod error;
pub mod stats;
pub mod types;

pub use config::{
    buffer_capacity_for, tick_ms_for, ConfigHandle, DisplayConfig, Parity, RuntimeConfig,
    SerialSettings, StopBits, SupervisorSettings,
};
pub use error::{DiscError, DiscErrorKind, DiscResult};
pub use stats::StatsSnapshot;
pub use types::{
    Canvas, Orientation, Panel, Point, Rect, RefreshMode, Topology, BROADCAST_ADDRESS, PANEL_ROWS,
    SUPPORTED_WIDTHS,
};
