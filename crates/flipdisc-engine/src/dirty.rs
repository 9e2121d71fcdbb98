//! Per-panel dirty-write cache.
//!
//! Hardware repaints whole panels, so dirty detection at panel granularity
//! matches the bus transaction unit exactly. The cache is owned by the
//! dispatcher and never touched concurrently.

use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::HashMap;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// 32-bit fingerprint of an encoded panel payload.
pub fn payload_hash(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// `panel id → fingerprint` of the last payload actually written.
#[derive(Debug, Default)]
pub struct PanelCache {
    entries: HashMap<String, u32>,
}

impl PanelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the panel must be rewritten for this payload hash.
    pub fn needs_write(&self, panel_id: &str, hash: u32) -> bool {
        self.entries.get(panel_id) != Some(&hash)
    }

    /// Record a successful write.
    pub fn mark_written(&mut self, panel_id: &str, hash: u32) {
        self.entries.insert(panel_id.to_string(), hash);
    }

    /// Forget one panel after a failed write so the next success always
    /// repaints it.
    pub fn invalidate(&mut self, panel_id: &str) {
        self.entries.remove(panel_id);
    }

    /// Forget everything. Invoked on transport reset and on topology
    /// publication.
    pub fn force_all(&mut self) {
        log::debug!("panel cache cleared ({} entries)", self.entries.len());
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
