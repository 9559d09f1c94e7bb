//! Dictionary metadata, packed marker codes and dictionary sources.

use crate::matcher::rotate_code_u64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum DictionaryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("marker_size must be at least 1")]
    ZeroMarkerSize,

    #[error("marker_size {0} needs more than 64 bits (unsupported)")]
    TooManyBits(usize),

    #[error("dictionary `{0}` has no codes")]
    Empty(String),

    #[error("code #{index} does not fit in {bits} bits")]
    CodeOutOfRange { index: usize, bits: usize },

    #[error("could only generate {generated} of {requested} distinct markers")]
    Exhausted { generated: usize, requested: usize },
}

/// An ArUco-style marker dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Human-readable name (for debugging/logging).
    pub name: String,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    pub max_correction_bits: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order with **black = 1**.
    pub codes: Vec<u64>,
}

impl Dictionary {
    /// Build and validate a dictionary.
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        max_correction_bits: u8,
        codes: Vec<u64>,
    ) -> Result<Self, DictionaryError> {
        let dict = Self {
            name: name.into(),
            marker_size,
            max_correction_bits,
            codes,
        };
        dict.validate()?;
        Ok(dict)
    }

    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        let bits = check_marker_size(self.marker_size)?;
        if self.codes.is_empty() {
            return Err(DictionaryError::Empty(self.name.clone()));
        }
        let mask = code_mask(bits);
        if let Some(index) = self.codes.iter().position(|&c| c & !mask != 0) {
            return Err(DictionaryError::CodeOutOfRange { index, bits });
        }
        Ok(())
    }

    /// Parse a codes file: `{ "name", "marker_size", "max_correction_bits", "codes" }`.
    pub fn from_json(raw: &str) -> Result<Self, DictionaryError> {
        let dict: Self = serde_json::from_str(raw)?;
        dict.validate()?;
        Ok(dict)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DictionaryError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Smallest Hamming distance between any two markers under any rotation,
    /// including each marker against its own rotations.
    pub fn min_distance(&self) -> u32 {
        let n = self.marker_size;
        let mut best = u32::MAX;
        for (i, &a) in self.codes.iter().enumerate() {
            for rot in 1..4u8 {
                best = best.min((a ^ rotate_code_u64(a, n, rot)).count_ones());
            }
            for &b in &self.codes[i + 1..] {
                for rot in 0..4u8 {
                    best = best.min((a ^ rotate_code_u64(b, n, rot)).count_ones());
                }
            }
        }
        best
    }

    /// Deterministically generate `count` markers of `marker_size × marker_size` bits.
    ///
    /// Candidates are drawn from a seeded RNG and accepted greedily when they
    /// keep at least `tau` bits of distance to every accepted marker (in all
    /// rotations) and to their own rotations. `tau` starts high and is relaxed
    /// whenever too many candidates in a row are rejected.
    pub fn generate(
        name: impl Into<String>,
        count: usize,
        marker_size: usize,
        seed: u64,
    ) -> Result<Self, DictionaryError> {
        const ATTEMPTS_PER_TAU: usize = 5_000;

        let bits = check_marker_size(marker_size)?;
        let mask = code_mask(bits);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tau = (bits as u32 / 3).max(1);
        let mut accepted: Vec<[u64; 4]> = Vec::with_capacity(count);
        let mut misses = 0usize;

        while accepted.len() < count {
            let code = rng.random::<u64>() & mask;
            let rots = [0u8, 1, 2, 3].map(|r| rotate_code_u64(code, marker_size, r));

            let self_ok = rots[1..]
                .iter()
                .all(|&r| (code ^ r).count_ones() >= tau);
            let others_ok = accepted
                .iter()
                .all(|prev| rots.iter().all(|&r| (prev[0] ^ r).count_ones() >= tau));

            if self_ok && others_ok {
                accepted.push(rots);
                misses = 0;
                continue;
            }

            misses += 1;
            if misses >= ATTEMPTS_PER_TAU {
                if tau == 1 {
                    return Err(DictionaryError::Exhausted {
                        generated: accepted.len(),
                        requested: count,
                    });
                }
                tau -= 1;
                misses = 0;
            }
        }

        let mut dict = Self {
            name: name.into(),
            marker_size,
            max_correction_bits: 0,
            codes: accepted.iter().map(|r| r[0]).collect(),
        };
        dict.validate()?;
        let dmin = dict.min_distance();
        dict.max_correction_bits = (dmin.saturating_sub(1) / 2).min(u8::MAX as u32) as u8;
        log::debug!(
            "generated dictionary {} ({} markers, {}x{} bits, min distance {})",
            dict.name,
            dict.len(),
            marker_size,
            marker_size,
            dmin
        );
        Ok(dict)
    }
}

fn check_marker_size(marker_size: usize) -> Result<usize, DictionaryError> {
    if marker_size == 0 {
        return Err(DictionaryError::ZeroMarkerSize);
    }
    let bits = marker_size * marker_size;
    if bits > 64 {
        return Err(DictionaryError::TooManyBits(marker_size));
    }
    Ok(bits)
}

#[inline]
fn code_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Parameters of a generated dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedDictionary {
    pub name: String,
    pub count: usize,
    pub marker_size: usize,
    pub seed: u64,
}

impl Default for GeneratedDictionary {
    /// 50 markers of 7x7 bits.
    fn default() -> Self {
        Self {
            name: "ARUCAM_7X7_50".to_string(),
            count: 50,
            marker_size: 7,
            seed: 0,
        }
    }
}

/// Where a dictionary comes from: a codes file or the seeded generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionarySource {
    File(PathBuf),
    Generated(GeneratedDictionary),
}

impl Default for DictionarySource {
    fn default() -> Self {
        Self::Generated(GeneratedDictionary::default())
    }
}

impl DictionarySource {
    pub fn load(&self) -> Result<Dictionary, DictionaryError> {
        match self {
            Self::File(path) => Dictionary::load_json(path),
            Self::Generated(g) => Dictionary::generate(g.name.clone(), g.count, g.marker_size, g.seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = Dictionary::generate("A", 20, 5, 7).expect("generate");
        let b = Dictionary::generate("A", 20, 5, 7).expect("generate");
        let c = Dictionary::generate("A", 20, 5, 8).expect("generate");
        assert_eq!(a, b);
        assert_ne!(a.codes, c.codes);
    }

    #[test]
    fn generated_codes_are_well_separated() {
        let dict = Dictionary::generate("ARUCAM_7X7_50", 50, 7, 0).expect("generate");
        assert_eq!(dict.len(), 50);
        assert_eq!(dict.bit_count(), 49);
        let dmin = dict.min_distance();
        assert!(dmin >= 6, "min distance {}", dmin);
        assert_eq!(dict.max_correction_bits as u32, (dmin - 1) / 2);
        assert!(dict.codes.iter().all(|&c| c < (1u64 << 49)));
    }

    #[test]
    fn validation_rejects_bad_dictionaries() {
        assert!(matches!(
            Dictionary::new("big", 9, 0, vec![1]),
            Err(DictionaryError::TooManyBits(9))
        ));
        assert!(matches!(
            Dictionary::new("empty", 4, 0, vec![]),
            Err(DictionaryError::Empty(_))
        ));
        assert!(matches!(
            Dictionary::new("wide", 4, 0, vec![0x1_0000]),
            Err(DictionaryError::CodeOutOfRange { index: 0, bits: 16 })
        ));
    }

    #[test]
    fn json_round_trip_through_file() {
        let dict = Dictionary::generate("T", 4, 4, 3).expect("generate");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dict.json");
        dict.write_json(&path).expect("write");
        assert_eq!(Dictionary::load_json(&path).expect("load"), dict);
    }

    #[test]
    fn source_parses_both_forms() {
        let file: DictionarySource =
            serde_json::from_str(r#"{ "file": "codes/dict.json" }"#).expect("file form");
        assert_eq!(file, DictionarySource::File(PathBuf::from("codes/dict.json")));

        let generated: DictionarySource =
            serde_json::from_str(r#"{ "generated": { "count": 10 } }"#).expect("generated form");
        let DictionarySource::Generated(g) = generated else {
            panic!("expected generated source");
        };
        assert_eq!(g.count, 10);
        assert_eq!(g.marker_size, 7);
    }
}
