//! Canvas, panel, and topology types.
//!
//! The canvas is the producer-facing coordinate system; panels are the
//! physical 7-row modules on the RS-485 bus. A validated topology keeps its
//! panels in canonical order (sorted by `(origin.y, origin.x, id)`) so that
//! mapping and bus writes are deterministic across runs.

use crate::error::{DiscError, DiscResult};
use serde::{Deserialize, Serialize};

/// Every panel module has exactly 7 rows of dots.
pub const PANEL_ROWS: u8 = 7;

/// Panel widths the bus command set can address.
pub const SUPPORTED_WIDTHS: [u8; 3] = [7, 14, 28];

/// RS-485 broadcast address. Reserved; never assigned to a panel.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Canvas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The logical, addressable pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u16,
    pub height: u16,
}

impl Canvas {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Whether `rect` lies entirely inside the canvas.
    pub fn contains(&self, rect: &Rect) -> bool {
        rect.x as u32 + rect.w as u32 <= self.width as u32
            && rect.y as u32 + rect.h as u32 <= self.height as u32
    }
}

/// Pixel position on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub fn overlaps(&self, other: &Rect) -> bool {
        (self.x as u32) < other.x as u32 + other.w as u32
            && (other.x as u32) < self.x as u32 + self.w as u32
            && (self.y as u32) < other.y as u32 + other.h as u32
            && (other.y as u32) < self.y as u32 + self.h as u32
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Panels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a panel is mounted relative to the canvas. Rotations are measured
/// clockwise; `FlipH` mirrors columns, `FlipV` mirrors rows. At most one
/// named orientation applies per panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Normal,
    Rot90,
    Rot180,
    Rot270,
    FlipH,
    FlipV,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Normal
    }
}

impl Orientation {
    /// Quarter-turn orientations swap the panel's canvas footprint axes.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Self::Rot90 | Self::Rot270)
    }
}

/// Whether panels repaint as soon as their data arrives or wait for the
/// end-of-tick global flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshMode {
    Instant,
    Buffered,
}

impl Default for RefreshMode {
    fn default() -> Self {
        Self::Instant
    }
}

/// One physical display module on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    pub address: u8,
    pub origin: Point,
    pub width: u8,
    #[serde(default = "default_panel_height")]
    pub height: u8,
    #[serde(default)]
    pub orientation: Orientation,
}

fn default_panel_height() -> u8 {
    PANEL_ROWS
}

impl Panel {
    /// The rectangle of canvas pixels this panel displays. Quarter-turn
    /// mounts occupy a footprint with swapped dimensions.
    pub fn footprint(&self) -> Rect {
        let (w, h) = if self.orientation.swaps_axes() {
            (self.height as u16, self.width as u16)
        } else {
            (self.width as u16, self.height as u16)
        };
        Rect {
            x: self.origin.x,
            y: self.origin.y,
            w,
            h,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Topology
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The validated set of panels plus the bus refresh mode. Construction
/// sorts panels into canonical order and enforces the topology invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    panels: Vec<Panel>,
    #[serde(default)]
    refresh: RefreshMode,
}

impl Topology {
    pub fn new(mut panels: Vec<Panel>, refresh: RefreshMode, canvas: Canvas) -> DiscResult<Self> {
        panels.sort_by(|a, b| {
            (a.origin.y, a.origin.x, a.id.as_str()).cmp(&(b.origin.y, b.origin.x, b.id.as_str()))
        });
        let topo = Self { panels, refresh };
        topo.validate(canvas)?;
        Ok(topo)
    }

    /// Panels in canonical `(origin.y, origin.x, id)` order.
    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn refresh(&self) -> RefreshMode {
        self.refresh
    }

    pub fn is_buffered(&self) -> bool {
        self.refresh == RefreshMode::Buffered
    }

    pub fn with_refresh(&self, refresh: RefreshMode) -> Self {
        Self {
            panels: self.panels.clone(),
            refresh,
        }
    }

    fn validate(&self, canvas: Canvas) -> DiscResult<()> {
        if canvas.width == 0 || canvas.height == 0 {
            return Err(DiscError::invalid_config("canvas must be non-empty"));
        }
        if self.panels.is_empty() {
            return Err(DiscError::invalid_config("topology has no panels"));
        }
        for (i, panel) in self.panels.iter().enumerate() {
            if panel.id.is_empty() {
                return Err(DiscError::invalid_config("panel id must not be empty"));
            }
            if !SUPPORTED_WIDTHS.contains(&panel.width) || panel.height != PANEL_ROWS {
                return Err(DiscError::invalid_config(format!(
                    "unsupported panel geometry {}x{}",
                    panel.width, panel.height
                ))
                .with_panel(&panel.id));
            }
            if panel.address == BROADCAST_ADDRESS {
                return Err(DiscError::invalid_config(format!(
                    "address 0x{:02X} is reserved for broadcast",
                    BROADCAST_ADDRESS
                ))
                .with_panel(&panel.id));
            }
            // The 7-wide bus command set has no buffered selector.
            if panel.width == 7 && self.refresh == RefreshMode::Buffered {
                return Err(DiscError::invalid_config(
                    "7-wide panels cannot run in buffered mode",
                )
                .with_panel(&panel.id));
            }
            let rect = panel.footprint();
            if !canvas.contains(&rect) {
                return Err(DiscError::invalid_config(format!(
                    "panel footprint {}x{} at ({}, {}) exceeds {}x{} canvas",
                    rect.w, rect.h, rect.x, rect.y, canvas.width, canvas.height
                ))
                .with_panel(&panel.id));
            }
            for other in &self.panels[i + 1..] {
                if other.id == panel.id {
                    return Err(DiscError::invalid_config(format!(
                        "duplicate panel id '{}'",
                        panel.id
                    )));
                }
                if other.address == panel.address {
                    return Err(DiscError::invalid_config(format!(
                        "panels '{}' and '{}' share address 0x{:02X}",
                        panel.id, other.id, panel.address
                    )));
                }
                if other.footprint().overlaps(&rect) {
                    return Err(DiscError::invalid_config(format!(
                        "panels '{}' and '{}' overlap",
                        panel.id, other.id
                    )));
                }
            }
        }
        Ok(())
    }
}
