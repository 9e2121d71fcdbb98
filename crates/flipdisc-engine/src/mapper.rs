//! Canvas-to-panel mapping.
//!
//! `map` is a pure function from a canvas bitmap and a topology to the
//! per-panel column bytes the bus messages carry. Panels are visited in
//! the topology's canonical order, so output is deterministic for a given
//! `(canvas, topology)` pair.

use flipdisc_core::{DiscError, DiscResult, Orientation, Panel, Topology, PANEL_ROWS};
use flipdisc_proto::Bitmap;

/// Column bytes for one panel, LSB = top pixel, bit 7 clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPayload<'a> {
    pub panel: &'a Panel,
    pub columns: Vec<u8>,
}

/// Map a canvas bitmap onto every panel of the topology.
pub fn map<'a>(bitmap: &Bitmap, topology: &'a Topology) -> DiscResult<Vec<PanelPayload<'a>>> {
    topology
        .panels()
        .iter()
        .map(|panel| {
            Ok(PanelPayload {
                columns: panel_columns(bitmap, panel)?,
                panel,
            })
        })
        .collect()
}

/// Reconstruct the canvas pixels covered by panels. Pixels outside every
/// panel footprint stay dark ("don't-care" under the parity invariant).
pub fn unmap(payloads: &[PanelPayload<'_>], width: u16, height: u16) -> Bitmap {
    let mut bitmap = Bitmap::zero(width, height);
    for payload in payloads {
        let panel = payload.panel;
        for (c, column) in payload.columns.iter().enumerate() {
            for r in 0..panel.height as usize {
                if column & (1 << r) != 0 {
                    let (r_in, c_in) = source_index(panel, r, c);
                    bitmap.set(
                        panel.origin.x + c_in as u16,
                        panel.origin.y + r_in as u16,
                        true,
                    );
                }
            }
        }
    }
    bitmap
}

fn panel_columns(bitmap: &Bitmap, panel: &Panel) -> DiscResult<Vec<u8>> {
    if panel.height != PANEL_ROWS {
        return Err(DiscError::encode(format!(
            "unsupported panel height {}",
            panel.height
        ))
        .with_panel(&panel.id));
    }
    let mut columns = vec![0u8; panel.width as usize];
    for (c, column) in columns.iter_mut().enumerate() {
        for r in 0..panel.height as usize {
            let (r_in, c_in) = source_index(panel, r, c);
            let x = panel.origin.x + c_in as u16;
            let y = panel.origin.y + r_in as u16;
            if bitmap.get(x, y) {
                *column |= 1 << r;
            }
        }
    }
    Ok(columns)
}

/// Footprint-local `(row, col)` that panel pixel `(r, c)` shows.
///
/// The footprint of a quarter-turn panel has swapped dimensions, so for
/// `Rot90`/`Rot270` the footprint is `width` rows by `height` columns.
fn source_index(panel: &Panel, r: usize, c: usize) -> (usize, usize) {
    let w = panel.width as usize;
    let h = panel.height as usize;
    match panel.orientation {
        Orientation::Normal => (r, c),
        // Clockwise quarter turn: the footprint's bottom-left corner
        // becomes the panel's top-left.
        Orientation::Rot90 => (w - 1 - c, r),
        Orientation::Rot180 => (h - 1 - r, w - 1 - c),
        Orientation::Rot270 => (c, h - 1 - r),
        Orientation::FlipH => (r, w - 1 - c),
        Orientation::FlipV => (h - 1 - r, c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipdisc_core::{Canvas, Point, RefreshMode};

    fn panel(id: &str, x: u16, y: u16, width: u8, orientation: Orientation) -> Panel {
        Panel {
            id: id.to_string(),
            address: (x / 7 + y) as u8 + 1,
            origin: Point { x, y },
            width,
            height: PANEL_ROWS,
            orientation,
        }
    }

    fn topology(panels: Vec<Panel>, canvas: Canvas) -> Topology {
        Topology::new(panels, RefreshMode::Instant, canvas).unwrap()
    }

    #[test]
    fn test_map_single_pixel_normal() {
        let canvas = Canvas::new(28, 7);
        let topo = topology(vec![panel("only", 0, 0, 28, Orientation::Normal)], canvas);
        let mut bitmap = Bitmap::zero(28, 7);
        bitmap.set(3, 1, true);

        let payloads = map(&bitmap, &topo).unwrap();
        assert_eq!(payloads.len(), 1);
        let columns = &payloads[0].columns;
        assert_eq!(columns.len(), 28);
        assert_eq!(columns[3], 1 << 1);
        assert!(columns.iter().enumerate().all(|(c, b)| c == 3 || *b == 0));
    }

    #[test]
    fn test_map_stripe_rot180_moves_to_bit_six() {
        // Horizontal stripe at y=0; a rot180 panel shows it on row 6.
        let canvas = Canvas::new(28, 7);
        let topo = topology(vec![panel("r", 0, 0, 28, Orientation::Rot180)], canvas);
        let mut bitmap = Bitmap::zero(28, 7);
        for x in 0..28 {
            bitmap.set(x, 0, true);
        }

        let payloads = map(&bitmap, &topo).unwrap();
        assert!(payloads[0].columns.iter().all(|b| *b == 0x40));
    }

    #[test]
    fn test_map_checkerboard_with_marker_rot180_hand_vector() {
        // Checkerboard (on where (x + y) is even) plus a full marker row at
        // y=6. After a half turn the marker lands on row 0 (bit 0) and the
        // checkerboard phase flips: even columns read 0x2B, odd read 0x55.
        let canvas = Canvas::new(28, 7);
        let topo = topology(vec![panel("r", 0, 0, 28, Orientation::Rot180)], canvas);
        let mut bitmap = Bitmap::zero(28, 7);
        for y in 0..7 {
            for x in 0..28 {
                if (x + y) % 2 == 0 || y == 6 {
                    bitmap.set(x, y, true);
                }
            }
        }

        let payloads = map(&bitmap, &topo).unwrap();
        for (c, byte) in payloads[0].columns.iter().enumerate() {
            let expected = if c % 2 == 0 { 0x2B } else { 0x55 };
            assert_eq!(*byte, expected, "column {}", c);
        }
    }

    #[test]
    fn test_map_rot90_reads_swapped_footprint() {
        // 28-wide panel mounted rot90 occupies a 7x28 canvas region. The
        // footprint's bottom-left pixel becomes the panel's top-left dot.
        let canvas = Canvas::new(7, 28);
        let topo = topology(vec![panel("r", 0, 0, 28, Orientation::Rot90)], canvas);
        let mut bitmap = Bitmap::zero(7, 28);
        bitmap.set(0, 27, true);

        let payloads = map(&bitmap, &topo).unwrap();
        assert_eq!(payloads[0].columns[0], 1 << 0);
        assert!(payloads[0].columns[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_map_rot270_reads_swapped_footprint() {
        // Counter-clockwise mount: the footprint's top-right pixel becomes
        // the panel's top-left dot.
        let canvas = Canvas::new(7, 28);
        let topo = topology(vec![panel("r", 0, 0, 28, Orientation::Rot270)], canvas);
        let mut bitmap = Bitmap::zero(7, 28);
        bitmap.set(6, 0, true);

        let payloads = map(&bitmap, &topo).unwrap();
        assert_eq!(payloads[0].columns[0], 1 << 0);
        assert!(payloads[0].columns[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_map_flips() {
        let canvas = Canvas::new(14, 7);
        let mut bitmap = Bitmap::zero(14, 7);
        bitmap.set(0, 0, true);

        let flip_h = topology(vec![panel("h", 0, 0, 14, Orientation::FlipH)], canvas);
        let payloads = map(&bitmap, &flip_h).unwrap();
        assert_eq!(payloads[0].columns[13], 1 << 0);

        let flip_v = topology(vec![panel("v", 0, 0, 14, Orientation::FlipV)], canvas);
        let payloads = map(&bitmap, &flip_v).unwrap();
        assert_eq!(payloads[0].columns[0], 1 << 6);
    }

    #[test]
    fn test_map_is_deterministic() {
        let canvas = Canvas::new(28, 14);
        let topo = topology(
            vec![
                panel("top", 0, 0, 28, Orientation::Normal),
                panel("bottom", 0, 7, 28, Orientation::Rot180),
            ],
            canvas,
        );
        let mut bitmap = Bitmap::zero(28, 14);
        bitmap.set(5, 3, true);
        bitmap.set(20, 12, true);

        let a = map(&bitmap, &topo).unwrap();
        let b = map(&bitmap, &topo).unwrap();
        assert_eq!(a, b);
        // Canonical order: top-most panel first.
        assert_eq!(a[0].panel.id, "top");
    }

    #[test]
    fn test_identity_orientation_is_idempotent() {
        // Mapping the panel region of an unmapped result reproduces the
        // same bytes.
        let canvas = Canvas::new(28, 7);
        let topo = topology(vec![panel("only", 0, 0, 28, Orientation::Normal)], canvas);
        let mut bitmap = Bitmap::zero(28, 7);
        bitmap.set(1, 2, true);
        bitmap.set(27, 6, true);

        let first = map(&bitmap, &topo).unwrap();
        let reconstructed = unmap(&first, 28, 7);
        let second = map(&reconstructed, &topo).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unmap_round_trip_all_orientations() {
        for orientation in [
            Orientation::Normal,
            Orientation::Rot90,
            Orientation::Rot180,
            Orientation::Rot270,
            Orientation::FlipH,
            Orientation::FlipV,
        ] {
            let (cw, ch) = if orientation.swaps_axes() {
                (7, 28)
            } else {
                (28, 7)
            };
            let canvas = Canvas::new(cw, ch);
            let topo = topology(vec![panel("p", 0, 0, 28, orientation)], canvas);

            let mut bitmap = Bitmap::zero(cw, ch);
            // Asymmetric pattern so a wrong transform cannot round-trip.
            bitmap.set(0, 0, true);
            bitmap.set(2, 1, true);
            bitmap.set(cw - 1, ch - 1, true);

            let payloads = map(&bitmap, &topo).unwrap();
            let back = unmap(&payloads, cw, ch);
            assert_eq!(back, bitmap, "{:?}", orientation);
        }
    }

    #[test]
    fn test_column_bytes_keep_bit_seven_clear() {
        let canvas = Canvas::new(28, 7);
        let topo = topology(vec![panel("p", 0, 0, 28, Orientation::Normal)], canvas);
        let mut bitmap = Bitmap::zero(28, 7);
        for y in 0..7 {
            for x in 0..28 {
                bitmap.set(x, y, true);
            }
        }

        let payloads = map(&bitmap, &topo).unwrap();
        assert!(payloads[0].columns.iter().all(|b| *b == 0x7F));
    }
}
