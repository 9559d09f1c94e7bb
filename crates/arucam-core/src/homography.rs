//! Planar homographies: 4-point solve, N-point DLT and perspective warps.

use crate::{sample_bilinear_u8, GrayImage, GrayImageView};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};

/// Projective map `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.h[(r, c)];
            }
        }
        out
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply_f64(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }

    #[inline]
    pub fn apply_f64(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Translate to the centroid and scale so the mean distance becomes sqrt(2).
fn hartley_normalize(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len().max(1) as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (out, t)
}

/// `T_dst^-1 * Hn * T_src`, scaled so that `h33 = 1`.
fn denormalize(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 || !s.is_finite() {
        return None;
    }
    Some(Homography::new(h / s))
}

/// Compute H such that `dst ~ H * src` from exactly 4 correspondences.
///
/// Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let to64 = |p: &Point2<f32>| Point2::new(p.x as f64, p.y as f64);
    homography_from_4pt_f64(&src.each_ref().map(to64), &dst.each_ref().map(to64))
}

/// Double-precision variant of [`homography_from_4pt`].
pub fn homography_from_4pt_f64(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    let (src_n, t_src) = hartley_normalize(src);
    let (dst_n, t_dst) = hartley_normalize(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);
    denormalize(hn, t_src, t_dst)
}

/// Estimate H such that `dst ~ H * src` with the normalized DLT (N >= 4).
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let (s, ts) = hartley_normalize(src);
    let (d, td) = hartley_normalize(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // A square system (n == 4) still works here: the null vector is the
    // right singular vector with the smallest singular value.
    let ata = a.transpose() * &a;
    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.total_cmp(r.1))?;
    let h = eig.eigenvectors.column(min_idx);

    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    denormalize(hn, ts, td)
}

/// Warp into a rectified patch: for each patch pixel, map into the source via
/// `h_img_from_rect` and sample bilinearly.
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    h_img_from_rect: Homography,
    out_w: usize,
    out_h: usize,
) -> GrayImage {
    let mut out = vec![0u8; out_w * out_h];

    for y in 0..out_h {
        for x in 0..out_w {
            // sample at pixel center
            let pr = Point2::new(x as f32 + 0.5, y as f32 + 0.5);
            let pi = h_img_from_rect.apply(pr);
            out[y * out_w + x] = sample_bilinear_u8(src, pi.x, pi.y);
        }
    }

    GrayImage {
        width: out_w,
        height: out_h,
        data: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a - b).norm() < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn ground_truth() -> Homography {
        Homography::from_array([
            [0.8, 0.05, 120.0],
            [-0.02, 1.1, 80.0],
            [0.0009, -0.0004, 1.0],
        ])
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = ground_truth();
        let inv = h.inverse().expect("invertible");
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(50.0, -20.0),
            Point2::new(320.0, 200.0),
        ] {
            assert_close(inv.apply_f64(h.apply_f64(p)), p, 1e-9);
        }
    }

    #[test]
    fn four_point_solve_recovers_h() {
        let gt = ground_truth();
        let rect = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(180.0, 0.0),
            Point2::new(180.0, 130.0),
            Point2::new(0.0, 130.0),
        ];
        let dst = rect.map(|p| gt.apply(p));
        let recovered = homography_from_4pt(&rect, &dst).expect("recoverable");

        for p in [Point2::new(60.0, 40.0), Point2::new(150.0, 120.0)] {
            assert_close(recovered.apply_f64(p), gt.apply_f64(p), 1e-2);
        }
    }

    #[test]
    fn dlt_handles_overdetermined_case() {
        let gt = ground_truth();
        let src: Vec<Point2<f64>> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point2::new(x as f64 * 40.0, y as f64 * 50.0)))
            .collect();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| gt.apply_f64(p)).collect();

        let est = estimate_homography(&src, &dst).expect("estimate");
        for p in [Point2::new(10.0, 20.0), Point2::new(80.0, 100.0)] {
            assert_close(est.apply_f64(p), gt.apply_f64(p), 1e-6);
        }
    }

    #[test]
    fn dlt_matches_four_point_solve() {
        let gt = ground_truth();
        let src = [
            Point2::new(-0.025, 0.025),
            Point2::new(0.025, 0.025),
            Point2::new(0.025, -0.025),
            Point2::new(-0.025, -0.025),
        ];
        let dst = src.map(|p| gt.apply_f64(p));
        let a = estimate_homography(&src, &dst).expect("dlt");
        let b = homography_from_4pt_f64(&src, &dst).expect("4pt");
        let probe = Point2::new(0.01, -0.004);
        assert_close(a.apply_f64(probe), b.apply_f64(probe), 1e-6);
    }

    #[test]
    fn mismatched_input_lengths_fail() {
        let src = [Point2::new(0.0, 0.0); 4];
        let dst = [Point2::new(1.0, 1.0); 3];
        assert!(estimate_homography(&src, &dst).is_none());
    }

    #[test]
    fn warp_reads_source_through_homography() {
        let mut img = GrayImage::filled(20, 20, 0);
        for y in 0..20 {
            for x in 10..20 {
                img.data[y * 20 + x] = 255;
            }
        }
        // patch pixel (x, y) reads source pixel (x + 8, y + 5)
        let h = Homography::from_array([[1.0, 0.0, 8.0], [0.0, 1.0, 5.0], [0.0, 0.0, 1.0]]);
        let patch = warp_perspective_gray(&img.view(), h, 4, 4);
        assert_eq!(patch.data[0], 0);
        assert_eq!(patch.data[3], 255);
    }
}
