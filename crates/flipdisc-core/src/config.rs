//! Declarative display configuration.
//!
//! The display file is JSON: canvas size, target cadence, buffer depth,
//! the panel list, and serial settings. No runtime state is persisted.
//! `RuntimeConfig` is the immutable snapshot the services actually read;
//! the control plane swaps a fresh `Arc<RuntimeConfig>` on every change
//! and readers copy the pointer once per tick or per request.

use crate::error::{DiscError, DiscResult};
use crate::types::{Canvas, Panel, RefreshMode, Topology};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Serial settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parity checking mode on the RS-485 line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Odd => "O",
            Self::Even => "E",
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

pub const MAX_BAUD: u32 = 115_200;

/// RS-485 port settings. 8 data bits, no parity, one stop bit at 9600 baud
/// unless the display file says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    /// Port path, e.g. `/dev/ttyUSB0`. `None` selects the mock sink.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Minimum quiet time between panel messages, in microseconds.
    #[serde(default)]
    pub inter_panel_us: u64,
}

fn default_baud() -> u32 {
    9600
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            inter_panel_us: 0,
        }
    }
}

impl SerialSettings {
    /// Shorthand like `9600 8N1` for logs and status payloads.
    pub fn shorthand(&self) -> String {
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::Two => "2",
        };
        format!("{} 8{}{}", self.baud, self.parity.label(), stop)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Supervisor settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Worker supervision tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSettings {
    /// A running producer with no heartbeat for this long is restarted.
    pub heartbeat_timeout_ms: u64,
    /// Liveness sweep period.
    pub sweep_interval_ms: u64,
    /// Start/stop commands exceeding this escalate to forced termination.
    pub command_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Give up after this many restarts inside `restart_window_ms`.
    pub restart_burst: u32,
    pub restart_window_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 10_000,
            sweep_interval_ms: 2_000,
            command_timeout_ms: 2_000,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            restart_burst: 5,
            restart_window_ms: 60_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Display file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_FPS_MAX: u8 = 30;

/// The declarative display file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    pub canvas: Canvas,
    #[serde(default = "default_fps")]
    pub fps: u8,
    #[serde(default = "default_fps_max")]
    pub fps_max: u8,
    /// Buffer depth in milliseconds of frames at the target cadence.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u32,
    /// Extra settle time appended to each tick interval.
    #[serde(default)]
    pub frame_gap_ms: u32,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub refresh: RefreshMode,
    pub panels: Vec<Panel>,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

fn default_fps() -> u8 {
    15
}

fn default_fps_max() -> u8 {
    DEFAULT_FPS_MAX
}

fn default_buffer_ms() -> u32 {
    500
}

fn default_write_timeout_ms() -> u64 {
    250
}

impl DisplayConfig {
    /// Read and validate a display file.
    pub fn load(path: impl AsRef<Path>) -> DiscResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DiscError::invalid_config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DiscError::invalid_config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the file and build the canonical topology.
    pub fn validate(&self) -> DiscResult<Topology> {
        if self.fps_max == 0 || self.fps_max > DEFAULT_FPS_MAX {
            return Err(DiscError::invalid_config(format!(
                "fpsMax must be in [1, {}]",
                DEFAULT_FPS_MAX
            )));
        }
        if self.fps == 0 || self.fps > self.fps_max {
            return Err(DiscError::invalid_config(format!(
                "fps must be in [1, {}]",
                self.fps_max
            )));
        }
        if self.serial.baud == 0 || self.serial.baud > MAX_BAUD {
            return Err(DiscError::invalid_config(format!(
                "baud must be in [1, {}]",
                MAX_BAUD
            )));
        }
        Topology::new(self.panels.clone(), self.refresh, self.canvas)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Runtime snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable runtime configuration snapshot.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub canvas: Canvas,
    pub topology: Arc<Topology>,
    pub fps: u8,
    pub fps_max: u8,
    pub buffer_ms: u32,
    pub frame_gap_ms: u32,
    pub write_timeout_ms: u64,
    pub inter_panel_us: u64,
}

impl RuntimeConfig {
    pub fn from_display(config: &DisplayConfig) -> DiscResult<Self> {
        let topology = config.validate()?;
        Ok(Self {
            canvas: config.canvas,
            topology: Arc::new(topology),
            fps: config.fps,
            fps_max: config.fps_max,
            buffer_ms: config.buffer_ms,
            frame_gap_ms: config.frame_gap_ms,
            write_timeout_ms: config.write_timeout_ms,
            inter_panel_us: config.serial.inter_panel_us,
        })
    }

    /// Target tick interval.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms() as u64)
    }

    /// `round(1000 / fps)`, the value rewritten into forwarded headers.
    pub fn tick_ms(&self) -> u16 {
        tick_ms_for(self.fps)
    }

    /// Buffer capacity in frames: `ceil(buffer_ms × fps / 1000)`, at least 1.
    pub fn buffer_capacity(&self) -> usize {
        buffer_capacity_for(self.buffer_ms, self.fps)
    }
}

pub fn tick_ms_for(fps: u8) -> u16 {
    let fps = fps.max(1) as u32;
    ((1000 + fps / 2) / fps) as u16
}

pub fn buffer_capacity_for(buffer_ms: u32, fps: u8) -> usize {
    let frames = (buffer_ms as u64 * fps.max(1) as u64).div_ceil(1000);
    (frames as usize).max(1)
}

/// Shared handle to the current runtime snapshot. Readers take one clone of
/// the inner `Arc` per tick or per request and never hold the lock across a
/// suspension point.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<RuntimeConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn snapshot(&self) -> Arc<RuntimeConfig> {
        self.inner.read().await.clone()
    }

    pub async fn swap(&self, config: RuntimeConfig) -> Arc<RuntimeConfig> {
        let next = Arc::new(config);
        let mut slot = self.inner.write().await;
        let previous = slot.clone();
        *slot = next;
        previous
    }
}
