//! Wire formats for the flipdisc server.
//!
//! Two serializations live here: the producer-facing RBM frame envelope
//! (16-byte big-endian header + packed 1-bit payload) and the bus-facing
//! RS-485 panel messages. Both are byte-exact normative formats.

pub mod bus;
pub mod rbm;

pub use bus::{
    config_selector, encode_panel_message, flush_message, CFG_14_BUFFERED, CFG_14_INSTANT,
    CFG_28_BUFFERED, CFG_28_INSTANT, CFG_7_INSTANT, CMD_FLUSH, EOM, SOM,
};
pub use rbm::{
    payload_len, rewrite_duration_ms, row_stride, Bitmap, RbmFrame, FLAG_INVERT, RBM_HEADER_LEN,
    RBM_MAGIC, RBM_VERSION,
};
