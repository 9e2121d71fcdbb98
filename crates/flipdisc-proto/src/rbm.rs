//! RBM frame envelope.
//!
//! Producers submit 1-bit bitmaps wrapped in a fixed 16-byte big-endian
//! header:
//!
//! | Offset | Bytes | Field             |
//! |--------|-------|-------------------|
//! | 0      | 2     | magic `"RB"`      |
//! | 2      | 1     | version (1)       |
//! | 3      | 1     | flags (bit 0 = invert) |
//! | 4      | 2     | width in pixels   |
//! | 6      | 2     | height in pixels  |
//! | 8      | 4     | sequence number   |
//! | 12     | 2     | frame duration ms (0 = dispatcher cadence) |
//! | 14     | 2     | reserved          |
//!
//! The payload is `height × ceil(width/8)` bytes, row-major, MSB-first
//! within each byte.

use bytes::Bytes;
use flipdisc_core::{DiscError, DiscResult};

pub const RBM_MAGIC: [u8; 2] = *b"RB";
pub const RBM_VERSION: u8 = 1;
pub const RBM_HEADER_LEN: usize = 16;

/// Header flag bit 0: invert every pixel after decode. Other bits reserved.
pub const FLAG_INVERT: u8 = 0x01;

const DURATION_OFFSET: usize = 12;

/// Bytes per payload row.
pub fn row_stride(width: u16) -> usize {
    (width as usize + 7) / 8
}

/// Total payload length for a `width × height` frame.
pub fn payload_len(width: u16, height: u16) -> usize {
    height as usize * row_stride(width)
}

/// Rewrite the `frame_duration_ms` field of an encoded frame in place.
/// Used by the forwarder to align producer-declared durations with the
/// dispatcher cadence without reallocating the frame.
pub fn rewrite_duration_ms(frame: &mut [u8], duration_ms: u16) -> DiscResult<()> {
    if frame.len() < RBM_HEADER_LEN {
        return Err(DiscError::bad_header(format!(
            "frame too short for header: {} bytes",
            frame.len()
        )));
    }
    frame[DURATION_OFFSET..DURATION_OFFSET + 2].copy_from_slice(&duration_ms.to_be_bytes());
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed RBM frame. The payload is shared, not copied, when frames move
/// between the forwarder and the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbmFrame {
    pub flags: u8,
    pub width: u16,
    pub height: u16,
    pub seq: u32,
    pub duration_ms: u16,
    payload: Bytes,
}

impl RbmFrame {
    /// Build a frame, validating the payload length.
    pub fn new(
        width: u16,
        height: u16,
        seq: u32,
        duration_ms: u16,
        flags: u8,
        payload: impl Into<Bytes>,
    ) -> DiscResult<Self> {
        let payload = payload.into();
        let expected = payload_len(width, height);
        if payload.len() != expected {
            return Err(DiscError::bad_header(format!(
                "payload length {} does not match {}x{} (expected {})",
                payload.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            flags,
            width,
            height,
            seq,
            duration_ms,
            payload,
        })
    }

    /// Parse and validate an encoded frame.
    pub fn parse(bytes: &[u8]) -> DiscResult<Self> {
        if bytes.len() < RBM_HEADER_LEN {
            return Err(DiscError::bad_header(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..2] != RBM_MAGIC {
            return Err(DiscError::bad_header(format!(
                "unknown magic 0x{:02X}{:02X}",
                bytes[0], bytes[1]
            )));
        }
        if bytes[2] != RBM_VERSION {
            return Err(DiscError::bad_header(format!(
                "unsupported version {}",
                bytes[2]
            )));
        }
        let flags = bytes[3];
        let width = u16::from_be_bytes([bytes[4], bytes[5]]);
        let height = u16::from_be_bytes([bytes[6], bytes[7]]);
        let seq = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let duration_ms = u16::from_be_bytes([bytes[12], bytes[13]]);
        // Offset 14..16 is reserved: zero on write, ignored on read.

        let expected = payload_len(width, height);
        let payload = &bytes[RBM_HEADER_LEN..];
        if payload.len() != expected {
            return Err(DiscError::bad_header(format!(
                "payload length {} does not match {}x{} (expected {})",
                payload.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            flags,
            width,
            height,
            seq,
            duration_ms,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Encode the frame. `decode(encode(f)) == f` for well-formed frames.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RBM_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&RBM_MAGIC);
        out.push(RBM_VERSION);
        out.push(self.flags);
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.duration_ms.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn invert(&self) -> bool {
        self.flags & FLAG_INVERT != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_duration_ms(&mut self, duration_ms: u16) {
        self.duration_ms = duration_ms;
    }

    /// Decode the packed payload into a bitmap, applying the invert flag.
    pub fn to_bitmap(&self) -> Bitmap {
        let bitmap = Bitmap::from_packed(self.width, self.height, self.payload.to_vec());
        if self.invert() {
            bitmap.inverted()
        } else {
            bitmap
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Bitmap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A decoded 1-bit canvas image, stored packed row-major, MSB-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u16,
    height: u16,
    rows: Vec<u8>,
}

impl Bitmap {
    /// An all-zero bitmap (the dispatcher's cold-start hold frame).
    pub fn zero(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            rows: vec![0u8; payload_len(width, height)],
        }
    }

    /// Wrap packed payload bytes. The caller guarantees the length; frames
    /// arriving from the network are validated by `RbmFrame::parse`.
    pub fn from_packed(width: u16, height: u16, rows: Vec<u8>) -> Self {
        debug_assert_eq!(rows.len(), payload_len(width, height));
        Self {
            width,
            height,
            rows,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn rows(&self) -> &[u8] {
        &self.rows
    }

    /// Pixel at `(x, y)`; out-of-range reads are dark.
    pub fn get(&self, x: u16, y: u16) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let stride = row_stride(self.width);
        let byte = self.rows[y as usize * stride + x as usize / 8];
        byte & (0x80 >> (x % 8)) != 0
    }

    pub fn set(&mut self, x: u16, y: u16, on: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let stride = row_stride(self.width);
        let index = y as usize * stride + x as usize / 8;
        let mask = 0x80 >> (x % 8);
        if on {
            self.rows[index] |= mask;
        } else {
            self.rows[index] &= !mask;
        }
    }

    /// Every pixel flipped. Padding bits in the final byte of each row stay
    /// clear so packed representations remain comparable.
    pub fn inverted(&self) -> Self {
        let stride = row_stride(self.width);
        let tail_bits = self.width as usize % 8;
        let tail_mask: u8 = if tail_bits == 0 {
            0xFF
        } else {
            !(0xFFu8 >> tail_bits)
        };
        let mut rows = Vec::with_capacity(self.rows.len());
        for (i, byte) in self.rows.iter().enumerate() {
            let inverted = !byte;
            if (i + 1) % stride == 0 {
                rows.push(inverted & tail_mask);
            } else {
                rows.push(inverted);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            rows,
        }
    }
}
