//! Thresholding utilities for candidate search and bit extraction.

use arucam_core::{GrayImage, GrayImageView};

/// Compute the Otsu threshold of a set of intensities.
///
/// Pixels `> threshold` are the bright class.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut hist = [0u32; 256];
    let (mut min_v, mut max_v) = (255u8, 0u8);
    for &v in samples {
        hist[v as usize] += 1;
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Standard deviation of a set of intensities.
pub(crate) fn std_dev(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    var.sqrt() as f32
}

/// Summed-area table with a zero guard row/column: `(w + 1) x (h + 1)`.
pub(crate) struct IntegralImage {
    width: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(img: &GrayImageView<'_>) -> Self {
        let stride = img.width + 1;
        let mut sums = vec![0u64; stride * (img.height + 1)];
        for y in 0..img.height {
            let mut row = 0u64;
            for x in 0..img.width {
                row += img.data[y * img.width + x] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            width: img.width,
            sums,
        }
    }

    /// Sum over the half-open box `[x0, x1) x [y0, y1)`.
    #[inline]
    pub(crate) fn box_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.width + 1;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1]
            - self.sums[y1 * s + x0]
    }
}

/// Inverted adaptive mean threshold.
///
/// A pixel becomes foreground (255) when it is at least `c` darker than the
/// mean of the `window x window` box around it (clipped at the borders).
pub fn adaptive_threshold_inv(img: &GrayImageView<'_>, window: usize, c: f32) -> GrayImage {
    let integral = IntegralImage::new(img);
    adaptive_threshold_inv_with(img, &integral, window, c)
}

pub(crate) fn adaptive_threshold_inv_with(
    img: &GrayImageView<'_>,
    integral: &IntegralImage,
    window: usize,
    c: f32,
) -> GrayImage {
    let (w, h) = (img.width, img.height);
    let r = (window.max(3) | 1) / 2;
    let mut out = GrayImage::filled(w, h, 0);

    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let area = ((x1 - x0) * (y1 - y0)) as f32;
            let mean = integral.box_sum(x0, y0, x1, y1) as f32 / area;
            if (img.data[y * w + x] as f32) <= mean - c {
                out.data[y * w + x] = 255;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![20u8; 50];
        samples.extend(std::iter::repeat_n(30u8, 10));
        samples.extend(std::iter::repeat_n(220u8, 60));
        let t = otsu_threshold_from_samples(&samples);
        assert!((30..220).contains(&t), "threshold {}", t);
    }

    #[test]
    fn integral_box_sum_matches_direct_sum() {
        let data: Vec<u8> = (0..35).map(|v| (v * 7 % 256) as u8).collect();
        let view = GrayImageView::new(7, 5, &data).expect("view");
        let ii = IntegralImage::new(&view);
        let mut direct = 0u64;
        for y in 1..4 {
            for x in 2..6 {
                direct += data[y * 7 + x] as u64;
            }
        }
        assert_eq!(ii.box_sum(2, 1, 6, 4), direct);
    }

    #[test]
    fn adaptive_threshold_marks_dark_edges() {
        // bright left half, dark right half
        let mut img = GrayImage::filled(10, 4, 200);
        for y in 0..4 {
            for x in 5..10 {
                img.data[y * 10 + x] = 20;
            }
        }
        let bin = adaptive_threshold_inv(&img.view(), 3, 7.0);
        // dark pixel next to the bright region is foreground
        assert_eq!(bin.data[5], 255);
        // bright pixels and flat dark interior are background
        assert_eq!(bin.data[4], 0);
        assert_eq!(bin.data[8], 0);
    }

    #[test]
    fn std_dev_of_constant_is_zero() {
        assert_eq!(std_dev(&[9, 9, 9]), 0.0);
        assert!(std_dev(&[0, 255]) > 100.0);
    }
}
