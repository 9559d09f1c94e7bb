//! Marker image generation.

use crate::Dictionary;
use arucam_core::GrayImage;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("marker id {id} is not in the dictionary ({len} markers)")]
    UnknownId { id: u32, len: usize },

    #[error("{side_px} px cannot hold {cells} cells")]
    TooSmall { side_px: usize, cells: usize },
}

/// Render marker `id` as a `side_px x side_px` image: black border of
/// `border_bits` cells around the inner code, black cells for set bits.
pub fn render_marker(
    dict: &Dictionary,
    id: u32,
    side_px: usize,
    border_bits: usize,
) -> Result<GrayImage, RenderError> {
    let Some(&code) = dict.codes.get(id as usize) else {
        return Err(RenderError::UnknownId {
            id,
            len: dict.len(),
        });
    };
    let n = dict.marker_size;
    let cells = n + 2 * border_bits;
    if side_px < cells {
        return Err(RenderError::TooSmall { side_px, cells });
    }

    let mut img = GrayImage::filled(side_px, side_px, 0);
    for y in 0..side_px {
        let cy = y * cells / side_px;
        for x in 0..side_px {
            let cx = x * cells / side_px;
            let inner = (border_bits..border_bits + n).contains(&cx)
                && (border_bits..border_bits + n).contains(&cy);
            if !inner {
                continue;
            }
            let bit = (cy - border_bits) * n + (cx - border_bits);
            if (code >> bit) & 1 == 0 {
                img.data[y * side_px + x] = 255;
            }
        }
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_is_black_and_bits_follow_code() {
        let dict = Dictionary::new("T", 2, 0, vec![0b1001]).expect("dict");
        // 4 cells of 10 px
        let img = render_marker(&dict, 0, 40, 1).expect("render");
        let at = |x: usize, y: usize| img.data[y * 40 + x];
        assert_eq!(at(2, 2), 0);
        assert_eq!(at(37, 20), 0);
        // bit 0 (top-left inner cell) set -> black
        assert_eq!(at(15, 15), 0);
        // bit 1 (top-right inner cell) clear -> white
        assert_eq!(at(25, 15), 255);
        assert_eq!(at(15, 25), 255);
        assert_eq!(at(25, 25), 0);
    }

    #[test]
    fn rejects_unknown_ids_and_tiny_sizes() {
        let dict = Dictionary::new("T", 3, 0, vec![1, 2]).expect("dict");
        assert_eq!(
            render_marker(&dict, 2, 50, 1),
            Err(RenderError::UnknownId { id: 2, len: 2 })
        );
        assert_eq!(
            render_marker(&dict, 0, 4, 1),
            Err(RenderError::TooSmall {
                side_px: 4,
                cells: 5
            })
        );
    }
}
