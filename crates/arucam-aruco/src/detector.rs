//! Full-image marker detection: candidate quads, bit extraction and
//! dictionary identification.

use crate::contours::{approx_polygon_closed, find_contours, is_convex};
use crate::threshold::{
    adaptive_threshold_inv_with, otsu_threshold_from_samples, std_dev, IntegralImage,
};
use crate::Matcher;
use arucam_core::{homography_from_4pt, warp_perspective_gray, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Detection parameters. Rates are relative to the largest image dimension
/// or to the candidate perimeter, so one set works across resolutions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Smallest adaptive-threshold window (pixels, odd).
    pub adaptive_thresh_win_size_min: usize,
    /// Largest adaptive-threshold window (pixels, odd).
    pub adaptive_thresh_win_size_max: usize,
    /// Window increment between threshold passes.
    pub adaptive_thresh_win_size_step: usize,
    /// A pixel is foreground when it is this much darker than its window mean.
    pub adaptive_thresh_constant: f32,
    /// Minimum contour length relative to the largest image dimension.
    pub min_marker_perimeter_rate: f32,
    /// Maximum contour length relative to the largest image dimension.
    pub max_marker_perimeter_rate: f32,
    /// Polygon approximation tolerance relative to the contour length.
    pub polygonal_approx_accuracy_rate: f32,
    /// Minimum quad side relative to the contour length.
    pub min_corner_distance_rate: f32,
    /// Corners closer than this to the image border are discarded (pixels).
    pub min_distance_to_border: u32,
    /// Two candidates closer than this (relative to the smaller perimeter) are merged.
    pub min_marker_distance_rate: f32,
    /// Width of the black marker border, in cells.
    pub marker_border_bits: usize,
    /// Resolution of the rectified patch used for bit extraction.
    pub perspective_remove_pixel_per_cell: usize,
    /// Fraction of each cell ignored on every side when counting pixels.
    pub perspective_remove_ignored_margin_per_cell: f32,
    /// Fraction of border cells allowed to read white.
    pub max_erroneous_bits_in_border_rate: f32,
    /// Patches with a lower intensity spread are treated as blank.
    pub min_otsu_std_dev: f32,
    /// Fraction of the dictionary's correction capability used when matching.
    pub error_correction_rate: f32,
    /// Also accept white-on-black markers.
    pub detect_inverted_marker: bool,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_win_size_step: 10,
            adaptive_thresh_constant: 7.0,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            polygonal_approx_accuracy_rate: 0.03,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3,
            min_marker_distance_rate: 0.05,
            marker_border_bits: 1,
            perspective_remove_pixel_per_cell: 4,
            perspective_remove_ignored_margin_per_cell: 0.13,
            max_erroneous_bits_in_border_rate: 0.35,
            min_otsu_std_dev: 5.0,
            error_correction_rate: 0.6,
            detect_inverted_marker: false,
        }
    }
}

impl DetectorParams {
    /// Adaptive-threshold window sizes visited by the detector.
    pub fn window_sizes(&self) -> Vec<usize> {
        let min = self.adaptive_thresh_win_size_min.max(3);
        let max = self.adaptive_thresh_win_size_max.max(min);
        let step = self.adaptive_thresh_win_size_step.max(1);
        (min..=max).step_by(step).collect()
    }
}

/// One identified marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Image corners ordered top-left, top-right, bottom-right, bottom-left
    /// in the marker's own frame (clockwise on screen).
    pub corners: [Point2<f32>; 4],
    /// Quarter turns between the marker and the detected quad.
    pub rotation: u8,
    /// Bits corrected while matching.
    pub hamming: u8,
    /// Observed inner bits (row-major, black=1), before rotation.
    pub code: u64,
    /// Whether the marker was read with inverted polarity.
    pub inverted: bool,
}

/// Result of one detection pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetections {
    /// Identified markers, sorted by id.
    pub markers: Vec<DetectedMarker>,
    /// Quads that looked like markers but failed decoding.
    pub rejected: Vec<[Point2<f32>; 4]>,
}

impl MarkerDetections {
    /// First detected marker with the given id.
    pub fn find(&self, id: u32) -> Option<&DetectedMarker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.markers.iter().map(|m| m.id).collect()
    }
}

/// A matcher together with detection parameters.
#[derive(Clone, Debug)]
pub struct MarkerDetector {
    matcher: Matcher,
    params: DetectorParams,
}

impl MarkerDetector {
    /// The matcher tolerance follows `params.error_correction_rate`.
    pub fn new(dict: crate::Dictionary, params: DetectorParams) -> Self {
        let matcher = Matcher::with_correction_rate(dict, params.error_correction_rate);
        Self { matcher, params }
    }

    pub fn from_matcher(matcher: Matcher, params: DetectorParams) -> Self {
        Self { matcher, params }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn detect(&self, img: &GrayImageView<'_>) -> MarkerDetections {
        detect_markers(img, &self.matcher, &self.params)
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    corners: [Point2<f32>; 4],
    perimeter: usize,
}

/// Detect and identify all markers of the matcher's dictionary in `img`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, matcher, params), fields(width = img.width, height = img.height))
)]
pub fn detect_markers(
    img: &GrayImageView<'_>,
    matcher: &Matcher,
    params: &DetectorParams,
) -> MarkerDetections {
    let mut out = MarkerDetections::default();
    if img.width < 3 || img.height < 3 || img.data.len() != img.width * img.height {
        return out;
    }

    let integral = IntegralImage::new(img);
    let mut candidates = Vec::new();
    for window in params.window_sizes() {
        let binary =
            adaptive_threshold_inv_with(img, &integral, window, params.adaptive_thresh_constant);
        let before = candidates.len();
        for contour in find_contours(&binary.view()) {
            if let Some(c) = quad_candidate(&contour.points, img.width, img.height, params) {
                candidates.push(c);
            }
        }
        log::trace!(
            "threshold window {}: {} quad candidates",
            window,
            candidates.len() - before
        );
    }

    let groups = group_close_candidates(candidates, params.min_marker_distance_rate);

    let marker_size = matcher.dictionary().marker_size;
    for group in groups {
        // Nested quads of one marker (e.g. both borders of the dark ring
        // around an inverted marker) share a group; the best-matching member wins.
        let best = group
            .iter()
            .filter_map(|cand| {
                let bits = read_marker_bits(img, &cand.corners, marker_size, params)?;
                let m = matcher.match_code(bits.code)?;
                Some((cand, bits, m))
            })
            .min_by_key(|(_, _, m)| m.hamming);
        match best {
            Some((cand, bits, m)) => {
                let r = m.rotation as usize;
                let corners = std::array::from_fn(|i| cand.corners[(i + r) % 4]);
                out.markers.push(DetectedMarker {
                    id: m.id,
                    corners,
                    rotation: m.rotation,
                    hamming: m.hamming,
                    code: bits.code,
                    inverted: bits.inverted,
                });
            }
            None => out.rejected.push(group[0].corners),
        }
    }

    out.markers.sort_by_key(|m| m.id);
    log::debug!(
        "detected {} markers ({} rejected candidates)",
        out.markers.len(),
        out.rejected.len()
    );
    out
}

fn quad_candidate(
    contour: &[Point2<i32>],
    width: usize,
    height: usize,
    params: &DetectorParams,
) -> Option<Candidate> {
    let max_dim = width.max(height) as f32;
    let len = contour.len() as f32;
    if len < params.min_marker_perimeter_rate * max_dim
        || len > params.max_marker_perimeter_rate * max_dim
    {
        return None;
    }

    let poly = approx_polygon_closed(contour, (len * params.polygonal_approx_accuracy_rate) as f64);
    if poly.len() != 4 {
        return None;
    }
    let mut q: [Point2<f32>; 4] = std::array::from_fn(|i| poly[i].cast::<f32>());
    if !is_convex(&q) {
        return None;
    }

    let min_side2 = (0..4)
        .map(|i| (q[(i + 1) % 4] - q[i]).norm_squared())
        .fold(f32::INFINITY, f32::min);
    let min_corner = len * params.min_corner_distance_rate;
    if min_side2 < min_corner * min_corner {
        return None;
    }

    let d = params.min_distance_to_border as f32;
    let (max_x, max_y) = (width as f32 - 1.0 - d, height as f32 - 1.0 - d);
    if q.iter().any(|p| p.x < d || p.y < d || p.x > max_x || p.y > max_y) {
        return None;
    }

    // Clockwise on screen.
    let d1 = q[1] - q[0];
    let d2 = q[2] - q[0];
    if d1.x * d2.y - d1.y * d2.x < 0.0 {
        q.swap(1, 3);
    }

    Some(Candidate {
        corners: q,
        perimeter: contour.len(),
    })
}

/// Mean squared corner distance, minimized over cyclic corner shifts.
fn quad_distance2(a: &[Point2<f32>; 4], b: &[Point2<f32>; 4]) -> f32 {
    (0..4)
        .map(|shift| {
            (0..4)
                .map(|i| (a[i] - b[(i + shift) % 4]).norm_squared())
                .sum::<f32>()
                / 4.0
        })
        .fold(f32::INFINITY, f32::min)
}

/// Group near-identical quads (the same marker found at several threshold
/// scales, or the inner and outer border of one ring). Groups are ordered by
/// their longest contour and each group lists its members longest first.
fn group_close_candidates(mut cands: Vec<Candidate>, rate: f32) -> Vec<Vec<Candidate>> {
    cands.sort_by(|a, b| b.perimeter.cmp(&a.perimeter));
    let mut groups: Vec<Vec<Candidate>> = Vec::with_capacity(cands.len());
    for c in cands {
        let close = groups.iter_mut().find(|g| {
            let k = &g[0];
            let limit = rate * k.perimeter.min(c.perimeter) as f32;
            quad_distance2(&k.corners, &c.corners) < limit * limit
        });
        match close {
            Some(group) => group.push(c),
            None => groups.push(vec![c]),
        }
    }
    groups
}

#[derive(Clone, Copy, Debug)]
struct MarkerBits {
    code: u64,
    inverted: bool,
}

/// Rectify the quad into a `cells * ppc` square patch and read one bit per cell.
fn read_marker_bits(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
    marker_size: usize,
    params: &DetectorParams,
) -> Option<MarkerBits> {
    let border = params.marker_border_bits;
    let cells = marker_size + 2 * border;
    let ppc = params.perspective_remove_pixel_per_cell.max(1);
    let side = cells * ppc;

    // Patch pixel centers `i + 0.5` for i = 0 and side - 1 land on the corners.
    let s = side as f32;
    let rect = [
        Point2::new(0.5, 0.5),
        Point2::new(s - 0.5, 0.5),
        Point2::new(s - 0.5, s - 0.5),
        Point2::new(0.5, s - 0.5),
    ];
    let h = homography_from_4pt(&rect, corners)?;
    let patch = warp_perspective_gray(img, h, side, side);

    if std_dev(&patch.data) < params.min_otsu_std_dev {
        return None;
    }
    let thr = otsu_threshold_from_samples(&patch.data);

    let margin = (params.perspective_remove_ignored_margin_per_cell * ppc as f32) as usize;
    let margin = if 2 * margin >= ppc { 0 } else { margin };
    let inner = ppc - 2 * margin;
    let cell_area = inner * inner;

    // white[cy * cells + cx]
    let mut white = vec![false; cells * cells];
    for cy in 0..cells {
        for cx in 0..cells {
            let mut bright = 0usize;
            for y in cy * ppc + margin..cy * ppc + margin + inner {
                let row = &patch.data[y * side..(y + 1) * side];
                bright += row[cx * ppc + margin..cx * ppc + margin + inner]
                    .iter()
                    .filter(|&&v| v > thr)
                    .count();
            }
            white[cy * cells + cx] = 2 * bright > cell_area;
        }
    }

    let is_border = |cx: usize, cy: usize| {
        cx < border || cy < border || cx >= cells - border || cy >= cells - border
    };
    let border_cells = cells * cells - marker_size * marker_size;
    let max_errors =
        (border_cells as f32 * params.max_erroneous_bits_in_border_rate).floor() as usize;

    let border_white = (0..cells * cells)
        .filter(|&i| is_border(i % cells, i / cells) && white[i])
        .count();

    let inverted = if border_white <= max_errors {
        false
    } else if params.detect_inverted_marker && border_cells - border_white <= max_errors {
        true
    } else {
        return None;
    };

    let mut code = 0u64;
    for by in 0..marker_size {
        for bx in 0..marker_size {
            let is_white = white[(by + border) * cells + bx + border];
            if is_white == inverted {
                code |= 1u64 << (by * marker_size + bx);
            }
        }
    }

    Some(MarkerBits { code, inverted })
}
