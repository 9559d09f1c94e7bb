//! Dictionary matching and rotation helpers.

use crate::Dictionary;

/// A dictionary match for an observed marker code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Marker id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that: `observed_code == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance between observed and dictionary code (after rotation).
    pub hamming: u8,
}

/// Brute-force matcher over all ids and the four rotations of each code.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher accepting codes within `max_hamming` bits of a marker.
    ///
    /// The dictionary is assumed validated (at most 64 bits per code).
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&base| [0u8, 1, 2, 3].map(|rot| rotate_code_u64(base, n, rot)))
            .collect();

        Self {
            dict,
            max_hamming,
            rotated,
        }
    }

    /// Matcher whose tolerance is `error_correction_rate` of the dictionary's
    /// correction capability.
    pub fn with_correction_rate(dict: Dictionary, error_correction_rate: f32) -> Self {
        let rate = error_correction_rate.clamp(0.0, 1.0);
        let max_hamming = (dict.max_correction_bits as f32 * rate).floor() as u8;
        Self::new(dict, max_hamming)
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the best match within `max_hamming`.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let h = (observed ^ cand).count_ones() as u8;
                if h > self.max_hamming || best.is_some_and(|b| b.hamming <= h) {
                    continue;
                }
                best = Some(Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming: h,
                });
                if h == 0 {
                    return best;
                }
            }
        }

        best
    }
}

/// Rotate a code stored in row-major bits (`idx = y * N + x`) by `rot`
/// quarter turns clockwise.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_dict() -> Dictionary {
        Dictionary::generate("TEST_4X4", 8, 4, 11).expect("dictionary")
    }

    #[test]
    fn rotate_four_times_is_identity() {
        let code = 0x0001_2345_6789_abcd_u64;
        let n = 7;
        let mut r = code;
        for _ in 0..4 {
            r = rotate_code_u64(r, n, 1);
        }
        assert_eq!(code & ((1u64 << 49) - 1), r);
    }

    #[test]
    fn single_rotation_moves_top_left_to_top_right() {
        // only bit (x=0, y=0) set
        let r = rotate_code_u64(1, 3, 1);
        assert_eq!(r, 1 << 2);
    }

    #[test]
    fn matcher_finds_rotated_code() {
        let dict = small_dict();
        let base = dict.codes[3];
        let matcher = Matcher::new(dict.clone(), 0);

        let observed = rotate_code_u64(base, dict.marker_size, 1);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!(m, Match { id: 3, rotation: 1, hamming: 0 });
    }

    #[test]
    fn matcher_corrects_within_tolerance_only() {
        let dict = small_dict();
        let base = dict.codes[5];
        let flipped = base ^ 0b1;

        let strict = Matcher::new(dict.clone(), 0);
        assert_eq!(strict.match_code(flipped), None);

        let tolerant = Matcher::new(dict, 1);
        let m = tolerant.match_code(flipped).expect("corrected");
        assert_eq!((m.id, m.hamming), (5, 1));
    }

    #[test]
    fn correction_rate_scales_capability() {
        let mut dict = small_dict();
        dict.max_correction_bits = 5;
        assert_eq!(Matcher::with_correction_rate(dict.clone(), 0.6).max_hamming(), 3);
        assert_eq!(Matcher::with_correction_rate(dict, 0.0).max_hamming(), 0);
    }
}
