//! Border following (Suzuki & Abe, 1985) and closed-polygon simplification.

use arucam_core::GrayImageView;
use nalgebra::Point2;

/// Neighbour offsets, clockwise on screen (y grows downwards), starting east.
const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const EAST: usize = 0;
const WEST: usize = 4;

/// Whether a border separates a foreground region from the outside or
/// surrounds a hole inside a foreground region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderKind {
    Outer,
    Hole,
}

#[derive(Clone, Debug)]
pub struct Contour {
    /// Border pixels in tracing order.
    pub points: Vec<Point2<i32>>,
    pub kind: BorderKind,
}

/// Trace every border of the non-zero regions of `binary` (8-connectivity).
pub fn find_contours(binary: &GrayImageView<'_>) -> Vec<Contour> {
    let (w, h) = (binary.width, binary.height);
    let pw = w + 2;
    let ph = h + 2;

    // One-pixel zero frame so neighbour lookups never leave the buffer.
    let mut labels = vec![0i32; pw * ph];
    for y in 0..h {
        for x in 0..w {
            if binary.data[y * w + x] != 0 {
                labels[(y + 1) * pw + x + 1] = 1;
            }
        }
    }

    let mut tracer = BorderTracer {
        labels,
        stride: pw,
        nbd: 1,
    };
    let mut contours = Vec::new();

    for y in 1..ph - 1 {
        for x in 1..pw - 1 {
            let v = tracer.at(x, y);
            if v == 0 {
                continue;
            }
            let start = if v == 1 && tracer.at(x - 1, y) == 0 {
                Some((WEST, BorderKind::Outer))
            } else if v >= 1 && tracer.at(x + 1, y) == 0 {
                Some((EAST, BorderKind::Hole))
            } else {
                None
            };

            if let Some((from, kind)) = start {
                tracer.nbd += 1;
                let points = tracer
                    .follow(x, y, from)
                    .into_iter()
                    .map(|(px, py)| Point2::new(px as i32 - 1, py as i32 - 1))
                    .collect();
                contours.push(Contour { points, kind });
            }
        }
    }

    contours
}

struct BorderTracer {
    labels: Vec<i32>,
    stride: usize,
    nbd: i32,
}

impl BorderTracer {
    #[inline]
    fn at(&self, x: usize, y: usize) -> i32 {
        self.labels[y * self.stride + x]
    }

    #[inline]
    fn set(&mut self, x: usize, y: usize, v: i32) {
        self.labels[y * self.stride + x] = v;
    }

    #[inline]
    fn step(x: usize, y: usize, dir: usize) -> (usize, usize) {
        let (dx, dy) = DIRS[dir];
        ((x as i32 + dx) as usize, (y as i32 + dy) as usize)
    }

    fn direction(from: (usize, usize), to: (usize, usize)) -> usize {
        let d = (to.0 as i32 - from.0 as i32, to.1 as i32 - from.1 as i32);
        DIRS.iter().position(|&o| o == d).unwrap_or(EAST)
    }

    /// Follow one border starting at `(x, y)` whose zero neighbour lies in
    /// direction `from`. Marks visited pixels with `+-nbd`.
    fn follow(&mut self, x: usize, y: usize, from: usize) -> Vec<(usize, usize)> {
        let start = (x, y);

        // Clockwise search for the first non-zero neighbour.
        let first = (0..8)
            .map(|k| (from + k) % 8)
            .map(|d| Self::step(x, y, d))
            .find(|&(nx, ny)| self.at(nx, ny) != 0);

        let Some(p1) = first else {
            // isolated pixel
            self.set(x, y, -self.nbd);
            return vec![start];
        };

        let mut points = Vec::new();
        let mut p2 = p1;
        let mut p3 = start;

        loop {
            // Counter-clockwise search around p3, starting just after p2.
            let d2 = Self::direction(p3, p2);
            let mut east_is_zero = false;
            let mut p4 = p2;
            for k in 1..=8 {
                let d = (d2 + 8 - k) % 8;
                let q = Self::step(p3.0, p3.1, d);
                if self.at(q.0, q.1) != 0 {
                    p4 = q;
                    break;
                }
                if d == EAST {
                    east_is_zero = true;
                }
            }

            if east_is_zero {
                self.set(p3.0, p3.1, -self.nbd);
            } else if self.at(p3.0, p3.1) == 1 {
                self.set(p3.0, p3.1, self.nbd);
            }
            points.push(p3);

            if p4 == start && p3 == p1 {
                break;
            }
            p2 = p3;
            p3 = p4;
        }

        points
    }
}

/// Perpendicular distance from `p` to the line through `a` and `b`.
fn line_distance(p: Point2<i32>, a: Point2<i32>, b: Point2<i32>) -> f64 {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let (px, py) = ((p.x - a.x) as f64, (p.y - a.y) as f64);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        return (px * px + py * py).sqrt();
    }
    (px * dy - py * dx).abs() / len
}

/// Douglas-Peucker on the open chain `pts[lo..=hi]`, marking kept vertices.
fn simplify_chain(pts: &[Point2<i32>], lo: usize, hi: usize, eps: f64, keep: &mut [bool]) {
    let mut stack = vec![(lo, hi)];
    while let Some((a, b)) = stack.pop() {
        if b <= a + 1 {
            continue;
        }
        let (mut far, mut far_d) = (a, -1.0);
        for (i, &p) in pts.iter().enumerate().take(b).skip(a + 1) {
            let d = line_distance(p, pts[a], pts[b]);
            if d > far_d {
                far = i;
                far_d = d;
            }
        }
        if far_d > eps {
            keep[far] = true;
            stack.push((a, far));
            stack.push((far, b));
        }
    }
}

/// Simplify a closed curve so that no dropped point lies further than
/// `epsilon` from the resulting polygon.
pub fn approx_polygon_closed(contour: &[Point2<i32>], epsilon: f64) -> Vec<Point2<i32>> {
    let n = contour.len();
    if n < 3 {
        return contour.to_vec();
    }

    let dist2 = |a: Point2<i32>, b: Point2<i32>| {
        let (dx, dy) = ((a.x - b.x) as i64, (a.y - b.y) as i64);
        dx * dx + dy * dy
    };
    let farthest_from = |p: Point2<i32>| {
        (0..n)
            .max_by_key(|&i| dist2(contour[i], p))
            .unwrap_or(0)
    };

    // Split the ring at two mutually distant points.
    let a = farthest_from(contour[0]);
    let b = farthest_from(contour[a]);
    if a == b {
        return vec![contour[a]];
    }

    // Rotate so that the ring starts at `a`, then close it back onto `a`.
    let mut ring: Vec<Point2<i32>> = contour[a..].iter().chain(&contour[..a]).copied().collect();
    ring.push(contour[a]);
    let mid = (b + n - a) % n;

    let mut keep = vec![false; ring.len()];
    keep[0] = true;
    keep[mid] = true;
    simplify_chain(&ring, 0, mid, epsilon, &mut keep);
    simplify_chain(&ring, mid, n, epsilon, &mut keep);

    ring[..n]
        .iter()
        .zip(&keep[..n])
        .filter_map(|(&p, &k)| k.then_some(p))
        .collect()
}

/// True if the closed polygon turns consistently in one direction.
pub fn is_convex(poly: &[Point2<f32>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f32;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use arucam_core::GrayImage;

    fn filled_rect(img: &mut GrayImage, x0: usize, y0: usize, x1: usize, y1: usize, v: u8) {
        for y in y0..=y1 {
            for x in x0..=x1 {
                img.data[y * img.width + x] = v;
            }
        }
    }

    #[test]
    fn square_ring_has_outer_and_hole_border() {
        let mut img = GrayImage::filled(10, 10, 0);
        filled_rect(&mut img, 2, 2, 7, 7, 255);
        filled_rect(&mut img, 4, 4, 5, 5, 0);

        let contours = find_contours(&img.view());
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].kind, BorderKind::Outer);
        assert_eq!(contours[1].kind, BorderKind::Hole);

        let outer = &contours[0].points;
        assert_eq!(outer.len(), 20);
        assert_eq!(outer[0], Point2::new(2, 2));
        assert!(outer.contains(&Point2::new(7, 7)));
        assert!(outer.iter().all(|p| p.x == 2 || p.x == 7 || p.y == 2 || p.y == 7));
    }

    #[test]
    fn blob_touching_image_border_is_traced() {
        let mut img = GrayImage::filled(6, 6, 0);
        filled_rect(&mut img, 0, 0, 2, 2, 255);
        let contours = find_contours(&img.view());
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points.len(), 8);
    }

    #[test]
    fn isolated_pixel_is_a_single_point_contour() {
        let mut img = GrayImage::filled(5, 5, 0);
        img.data[2 * 5 + 3] = 255;
        let contours = find_contours(&img.view());
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points, vec![Point2::new(3, 2)]);
    }

    #[test]
    fn polygon_approximation_recovers_square_corners() {
        let mut img = GrayImage::filled(40, 40, 0);
        filled_rect(&mut img, 5, 8, 30, 33, 255);
        let contours = find_contours(&img.view());
        let poly = approx_polygon_closed(&contours[0].points, 3.0);
        assert_eq!(poly.len(), 4);
        for corner in [
            Point2::new(5, 8),
            Point2::new(30, 8),
            Point2::new(30, 33),
            Point2::new(5, 33),
        ] {
            assert!(poly.contains(&corner), "missing {:?} in {:?}", corner, poly);
        }
    }

    #[test]
    fn convexity_check() {
        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(is_convex(&square));
        let dart = [
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(0.0, 2.0),
            Point2::new(0.5, 1.0),
        ];
        assert!(!is_convex(&dart));
    }
}
