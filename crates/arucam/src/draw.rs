//! Overlay drawing on RGB frames.

use crate::core::{project_points, CameraModel, MarkerPose};
use ::image::{Rgb, RgbImage};
use nalgebra::{Point2, Point3};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

#[inline]
fn set_pixel(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

/// Fill the square of side `2 * radius + 1` centered on `(x, y)`.
pub fn fill_square(img: &mut RgbImage, center: (i64, i64), radius: i64, color: [u8; 3]) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            set_pixel(img, center.0 + dx, center.1 + dy, color);
        }
    }
}

/// Bresenham line, thickened by stamping a square brush at every step.
/// Pixels outside the image are skipped.
pub fn draw_line(
    img: &mut RgbImage,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; 3],
    thickness: usize,
) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    let half = (thickness.max(1) as i64 - 1) / 2;

    loop {
        fill_square(img, (x0, y0), half, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[inline]
fn to_pixel(p: Point2<f32>) -> (i64, i64) {
    (p.x.round() as i64, p.y.round() as i64)
}

/// Draw a closed polygon.
pub fn draw_polygon(img: &mut RgbImage, points: &[Point2<f32>], color: [u8; 3], thickness: usize) {
    for (i, &p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        draw_line(img, to_pixel(p), to_pixel(q), color, thickness);
    }
}

/// Green marker outline with the first (top-left) corner highlighted in red.
pub fn draw_marker_outline(img: &mut RgbImage, corners: &[Point2<f32>; 4], thickness: usize) {
    draw_polygon(img, corners, GREEN, thickness);
    fill_square(img, to_pixel(corners[0]), thickness as i64 + 1, RED);
}

/// Draw the marker frame axes: X red, Y green, Z blue, each `length` long.
///
/// Returns `false` (drawing nothing) when the origin or a tip falls behind
/// the camera.
pub fn draw_frame_axes(
    img: &mut RgbImage,
    camera: &CameraModel,
    pose: &MarkerPose,
    length: f64,
    thickness: usize,
) -> bool {
    let points = [
        Point3::origin(),
        Point3::new(length, 0.0, 0.0),
        Point3::new(0.0, length, 0.0),
        Point3::new(0.0, 0.0, length),
    ];
    let projected: Option<Vec<Point2<f64>>> =
        project_points(camera, pose, &points).into_iter().collect();
    let Some(px) = projected else {
        return false;
    };

    let to_i = |p: Point2<f64>| (p.x.round() as i64, p.y.round() as i64);
    let origin = to_i(px[0]);
    for (tip, color) in px[1..].iter().zip([RED, GREEN, BLUE]) {
        draw_line(img, origin, to_i(*tip), color, thickness);
    }
    true
}
