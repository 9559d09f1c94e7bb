//! Whole-image undistortion: optimal new camera matrix, remap tables and
//! valid-pixel ROI.

use crate::{CameraIntrinsics, CameraModel, GrayImage, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Grid resolution used to probe the distortion field along the image.
const PROBE_GRID: usize = 9;

/// Integer pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Crop an interleaved `C`-channel buffer of size `width x height`.
    pub fn crop_interleaved<const C: usize>(&self, data: &[u8], width: usize) -> Vec<u8> {
        let (x0, w) = (self.x as usize, self.width as usize);
        let mut out = Vec::with_capacity(w * self.height as usize * C);
        for y in self.y as usize..(self.y + self.height) as usize {
            let row = (y * width + x0) * C;
            out.extend_from_slice(&data[row..row + w * C]);
        }
        out
    }
}

#[derive(Clone, Copy, Debug)]
struct RectF {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Inner (fully valid) and outer (bounding) rectangles of the undistorted
/// image border. With `target = None` the rectangles are in normalized
/// coordinates, otherwise in pixels of `target`.
fn undistorted_rectangles(
    camera: &CameraModel,
    width: u32,
    height: u32,
    target: Option<&CameraIntrinsics>,
) -> Option<(RectF, RectF)> {
    let n = PROBE_GRID;
    let (mut ix0, mut ix1, mut iy0, mut iy1) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);
    let (mut ox0, mut ox1, mut oy0, mut oy1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);

    for gy in 0..n {
        for gx in 0..n {
            let px = Point2::new(
                gx as f64 * (width as f64 - 1.0) / (n - 1) as f64,
                gy as f64 * (height as f64 - 1.0) / (n - 1) as f64,
            );
            let p = match target {
                Some(k) => camera.undistort_pixel_to(px, k)?,
                None => camera.undistort_pixel(px)?,
            };

            ox0 = ox0.min(p.x);
            ox1 = ox1.max(p.x);
            oy0 = oy0.min(p.y);
            oy1 = oy1.max(p.y);

            if gx == 0 {
                ix0 = ix0.max(p.x);
            }
            if gx == n - 1 {
                ix1 = ix1.min(p.x);
            }
            if gy == 0 {
                iy0 = iy0.max(p.y);
            }
            if gy == n - 1 {
                iy1 = iy1.min(p.y);
            }
        }
    }

    let inner = RectF {
        x: ix0,
        y: iy0,
        width: ix1 - ix0,
        height: iy1 - iy0,
    };
    let outer = RectF {
        x: ox0,
        y: oy0,
        width: ox1 - ox0,
        height: oy1 - oy0,
    };
    Some((inner, outer))
}

/// Compute a distortion-free camera for `new_size` and the ROI of valid pixels.
///
/// `alpha = 0` keeps only valid pixels (zoomed in), `alpha = 1` keeps every
/// source pixel (black corners). Values in between blend the two. Returns
/// `None` if the distortion model cannot be inverted at the probe points.
pub fn optimal_new_camera_matrix(
    camera: &CameraModel,
    size: (u32, u32),
    alpha: f64,
    new_size: (u32, u32),
) -> Option<(CameraIntrinsics, Roi)> {
    let alpha = alpha.clamp(0.0, 1.0);
    let (w, h) = size;
    let (nw, nh) = new_size;
    if w < 2 || h < 2 || nw == 0 || nh == 0 {
        return None;
    }

    let (inner, outer) = undistorted_rectangles(camera, w, h, None)?;
    if inner.width <= 0.0 || inner.height <= 0.0 || outer.width <= 0.0 || outer.height <= 0.0 {
        return None;
    }

    let (sw, sh) = ((nw as f64 - 1.0).max(1.0), (nh as f64 - 1.0).max(1.0));

    let fx0 = sw / inner.width;
    let fy0 = sh / inner.height;
    let cx0 = -fx0 * inner.x;
    let cy0 = -fy0 * inner.y;

    let fx1 = sw / outer.width;
    let fy1 = sh / outer.height;
    let cx1 = -fx1 * outer.x;
    let cy1 = -fy1 * outer.y;

    let new_k = CameraIntrinsics::new(
        fx0 * (1.0 - alpha) + fx1 * alpha,
        fy0 * (1.0 - alpha) + fy1 * alpha,
        cx0 * (1.0 - alpha) + cx1 * alpha,
        cy0 * (1.0 - alpha) + cy1 * alpha,
    );

    let (inner, _) = undistorted_rectangles(camera, w, h, Some(&new_k))?;
    let x0 = inner.x.ceil().max(0.0);
    let y0 = inner.y.ceil().max(0.0);
    let x1 = (inner.x.ceil() + inner.width.floor()).min(nw as f64);
    let y1 = (inner.y.ceil() + inner.height.floor()).min(nh as f64);

    let roi = if x1 > x0 && y1 > y0 {
        Roi {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        }
    } else {
        Roi::default()
    };

    Some((new_k, roi))
}

/// Per-pixel source coordinates for undistorting into a new camera.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    pub width: usize,
    pub height: usize,
    /// Interleaved `(x, y)` source coordinates, NaN where undistortion is undefined.
    pub map: Vec<[f32; 2]>,
}

impl UndistortMap {
    /// For every destination pixel of `new_k`, locate its distorted source pixel.
    pub fn new(camera: &CameraModel, new_k: &CameraIntrinsics, width: usize, height: usize) -> Self {
        let mut map = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let n = new_k.pixel_to_normalized(Point2::new(x as f64, y as f64));
                let src = camera.project_normalized(n);
                map.push([src.x as f32, src.y as f32]);
            }
        }
        Self { width, height, map }
    }

    /// Remap a grayscale image, writing 0 where the source is out of range.
    pub fn remap_gray(&self, src: &GrayImageView<'_>) -> GrayImage {
        let data = self.remap_interleaved::<1>(src.data, src.width, src.height);
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Remap an interleaved `C`-channel 8-bit image with bilinear sampling.
    pub fn remap_interleaved<const C: usize>(
        &self,
        src: &[u8],
        src_w: usize,
        src_h: usize,
    ) -> Vec<u8> {
        let mut out = vec![0u8; self.width * self.height * C];
        if src.len() != src_w * src_h * C || src_w == 0 || src_h == 0 {
            return out;
        }
        let max_x = (src_w - 1) as f32;
        let max_y = (src_h - 1) as f32;

        for (i, &[sx, sy]) in self.map.iter().enumerate() {
            const SLACK: f32 = 1e-3;
            if !(sx >= -SLACK && sy >= -SLACK && sx <= max_x + SLACK && sy <= max_y + SLACK) {
                continue;
            }
            let (sx, sy) = (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y));
            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let y1 = (y0 + 1).min(src_h - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..C {
                let p = |x: usize, y: usize| src[(y * src_w + x) * C + c] as f32;
                let a = p(x0, y0) + fx * (p(x1, y0) - p(x0, y0));
                let b = p(x0, y1) + fx * (p(x1, y1) - p(x0, y1));
                out[i * C + c] = (a + fy * (b - a) + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}
