//! Statistics snapshot published by the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the pipeline, attached to the stats stream and to
/// control-plane reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Frames accepted from the active producer.
    pub received: u64,
    /// Frames the dispatcher has pulled from the buffer.
    pub forwarded: u64,
    /// Oldest-drop evictions.
    pub dropped_overflow: u64,
    pub duplicates_suppressed: u64,
    pub no_token_suppressed: u64,
    /// Exponential moving average of the realised cadence.
    pub effective_fps: f64,
    pub buffer_level: usize,
    /// Occupancy high-water mark since the previous snapshot.
    pub buffer_high_water: usize,
    pub last_tick_ms: f64,
    pub panels_written: u64,
    pub degraded: bool,
    pub active_source: Option<String>,
    pub fps: u8,
    pub timestamp: DateTime<Utc>,
}
