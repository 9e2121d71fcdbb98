//! RS-485 panel messages.
//!
//! A panel update is the byte sequence `0x80, cfg, address, data…, 0x8F`
//! with one data byte per column (LSB = topmost pixel, bit 7 always 0).
//! In buffered mode the dispatcher appends the global flush
//! `0x80, 0x82, 0x8F` after the last panel of a tick.

use flipdisc_core::{DiscError, DiscResult, Panel, RefreshMode, PANEL_ROWS};

/// Start-of-message marker.
pub const SOM: u8 = 0x80;
/// End-of-message marker.
pub const EOM: u8 = 0x8F;
/// Command byte of the global flush message.
pub const CMD_FLUSH: u8 = 0x82;

pub const CFG_28_INSTANT: u8 = 0x83;
pub const CFG_28_BUFFERED: u8 = 0x84;
pub const CFG_14_INSTANT: u8 = 0x92;
pub const CFG_14_BUFFERED: u8 = 0x93;
pub const CFG_7_INSTANT: u8 = 0x87;

/// Width/refresh command selector. There is no buffered selector for
/// 7-wide panels.
pub fn config_selector(width: u8, refresh: RefreshMode) -> DiscResult<u8> {
    match (width, refresh) {
        (28, RefreshMode::Instant) => Ok(CFG_28_INSTANT),
        (28, RefreshMode::Buffered) => Ok(CFG_28_BUFFERED),
        (14, RefreshMode::Instant) => Ok(CFG_14_INSTANT),
        (14, RefreshMode::Buffered) => Ok(CFG_14_BUFFERED),
        (7, RefreshMode::Instant) => Ok(CFG_7_INSTANT),
        (width, refresh) => Err(DiscError::encode(format!(
            "no command selector for {}-wide panels in {:?} mode",
            width, refresh
        ))),
    }
}

/// Encode one panel update. `columns` must hold exactly `panel.width`
/// bytes of LSB-top column data.
pub fn encode_panel_message(
    panel: &Panel,
    refresh: RefreshMode,
    columns: &[u8],
) -> DiscResult<Vec<u8>> {
    if panel.height != PANEL_ROWS {
        return Err(DiscError::encode(format!(
            "unsupported panel height {}",
            panel.height
        ))
        .with_panel(&panel.id));
    }
    let cfg = config_selector(panel.width, refresh).map_err(|e| e.with_panel(&panel.id))?;
    if columns.len() != panel.width as usize {
        return Err(DiscError::encode(format!(
            "expected {} column bytes, got {}",
            panel.width,
            columns.len()
        ))
        .with_panel(&panel.id));
    }
    debug_assert!(columns.iter().all(|b| b & 0x80 == 0));

    let mut message = Vec::with_capacity(4 + columns.len());
    message.push(SOM);
    message.push(cfg);
    message.push(panel.address);
    message.extend_from_slice(columns);
    message.push(EOM);
    Ok(message)
}

/// The global flush emitted after the last panel of a buffered-mode tick.
pub fn flush_message() -> [u8; 3] {
    [SOM, CMD_FLUSH, EOM]
}
