//! Undistortion of whole RGB frames and the original/undistorted comparison.

use crate::core::{optimal_new_camera_matrix, CameraIntrinsics, CameraModel, Roi, UndistortMap};
use crate::detect::{load_rgb, ArucamError};
use crate::io::{write_json, UndistortConfig};
use ::image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Horizontal gap between the two panels of [`side_by_side`].
const PANEL_GAP: u32 = 16;

#[derive(Clone, Debug)]
pub struct UndistortResult {
    /// Full undistorted frame (same size as the input).
    pub image: RgbImage,
    /// `image` cropped to the valid-pixel ROI.
    pub cropped: RgbImage,
    pub new_intrinsics: CameraIntrinsics,
    pub roi: Roi,
}

/// Undistort `rgb` into the optimal new camera for `alpha` and crop the result
/// to its valid region. An empty ROI leaves `cropped` equal to `image`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(rgb, camera), fields(width = rgb.width(), height = rgb.height()))
)]
pub fn undistort_image(
    rgb: &RgbImage,
    camera: &CameraModel,
    alpha: f64,
) -> Result<UndistortResult, ArucamError> {
    let (w, h) = rgb.dimensions();
    let (new_intrinsics, roi) = optimal_new_camera_matrix(camera, (w, h), alpha, (w, h))
        .ok_or(ArucamError::Undistort {
            width: w,
            height: h,
        })?;

    let map = UndistortMap::new(camera, &new_intrinsics, w as usize, h as usize);
    let data = map.remap_interleaved::<3>(rgb.as_raw(), w as usize, h as usize);
    let image = RgbImage::from_raw(w, h, data).ok_or(ArucamError::Undistort {
        width: w,
        height: h,
    })?;

    let cropped = if roi.is_empty() {
        log::warn!("valid-pixel region is empty; keeping the full undistorted frame");
        image.clone()
    } else {
        let data = roi.crop_interleaved::<3>(image.as_raw(), w as usize);
        RgbImage::from_raw(roi.width, roi.height, data).ok_or(ArucamError::Undistort {
            width: w,
            height: h,
        })?
    };

    log::debug!(
        "new camera fx={:.2} fy={:.2} cx={:.2} cy={:.2}, roi {:?}",
        new_intrinsics.fx,
        new_intrinsics.fy,
        new_intrinsics.cx,
        new_intrinsics.cy,
        roi
    );

    Ok(UndistortResult {
        image,
        cropped,
        new_intrinsics,
        roi,
    })
}

/// Place two frames next to each other on a white canvas, top-aligned.
pub fn side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let width = left.width() + PANEL_GAP + right.width();
    let height = left.height().max(right.height());
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    ::image::imageops::replace(&mut canvas, left, 0, 0);
    ::image::imageops::replace(&mut canvas, right, (left.width() + PANEL_GAP) as i64, 0);
    canvas
}

/// Summary written next to the comparison images.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndistortReport {
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub alpha: f64,
    pub new_camera_matrix: [[f64; 3]; 3],
    pub roi: Roi,
    pub outputs: Vec<PathBuf>,
}

/// Run the comparison described by `cfg` and write its images and report.
pub fn run_undistort(cfg: &UndistortConfig) -> Result<UndistortReport, ArucamError> {
    let camera = cfg.camera.to_model()?;
    let rgb = load_rgb(&cfg.image_path)?;
    let result = undistort_image(&rgb, &camera, cfg.alpha)?;

    fs::create_dir_all(&cfg.output_dir)?;
    let dir = &cfg.output_dir;
    let outputs = vec![
        dir.join("undistorted.png"),
        dir.join("cropped.png"),
        dir.join("comparison.png"),
    ];
    result.image.save(&outputs[0])?;
    result.cropped.save(&outputs[1])?;
    side_by_side(&rgb, &result.cropped).save(&outputs[2])?;

    let report = UndistortReport {
        image_path: cfg.image_path.clone(),
        width: rgb.width(),
        height: rgb.height(),
        alpha: cfg.alpha,
        new_camera_matrix: result.new_intrinsics.to_array(),
        roi: result.roi,
        outputs,
    };
    write_json(dir.join("undistort_report.json"), &report)?;
    log::info!(
        "undistorted {} -> {} (roi {}x{} at {},{})",
        cfg.image_path.display(),
        dir.display(),
        report.roi.width,
        report.roi.height,
        report.roi.x,
        report.roi.y
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Distortion;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 128]))
    }

    #[test]
    fn pinhole_camera_leaves_frame_nearly_untouched() {
        let camera = CameraModel::new(
            CameraIntrinsics::new(200.0, 200.0, 31.5, 23.5),
            Distortion::default(),
        )
        .expect("camera");
        let rgb = gradient(64, 48);
        let out = undistort_image(&rgb, &camera, 1.0).expect("undistort");
        assert_eq!(out.image.dimensions(), (64, 48));
        let center = out.image.get_pixel(32, 24).0;
        let orig = rgb.get_pixel(32, 24).0;
        for c in 0..3 {
            assert!((center[c] as i32 - orig[c] as i32).abs() <= 2);
        }
        assert!(out.cropped.width() >= 62 && out.cropped.height() >= 46);
    }

    #[test]
    fn barrel_distortion_crops_to_valid_region() {
        let camera = CameraModel::from_opencv(
            [[80.0, 0.0, 39.5], [0.0, 80.0, 29.5], [0.0, 0.0, 1.0]],
            &[-0.3, 0.09, 0.0, 0.0, 0.0],
        )
        .expect("camera");
        let out = undistort_image(&gradient(80, 60), &camera, 1.0).expect("undistort");
        assert_eq!(out.cropped.dimensions(), (out.roi.width, out.roi.height));
        assert!(out.roi.width < 80);
        // the undistorted top edge bows inwards, so the top row center is empty
        assert_eq!(out.image.get_pixel(40, 0).0, [0, 0, 0]);
    }

    #[test]
    fn side_by_side_places_panels() {
        let left = RgbImage::from_pixel(4, 6, Rgb([1, 2, 3]));
        let right = RgbImage::from_pixel(5, 3, Rgb([9, 9, 9]));
        let canvas = side_by_side(&left, &right);
        assert_eq!(canvas.dimensions(), (4 + PANEL_GAP + 5, 6));
        assert_eq!(canvas.get_pixel(0, 5).0, [1, 2, 3]);
        assert_eq!(canvas.get_pixel(4 + PANEL_GAP, 0).0, [9, 9, 9]);
        assert_eq!(canvas.get_pixel(4 + PANEL_GAP, 5).0, [255, 255, 255]);
    }

    #[test]
    fn run_reports_missing_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = UndistortConfig {
            image_path: dir.path().join("missing.jpg"),
            camera: crate::io::CameraConfig::comparison_default(),
            alpha: 1.0,
            output_dir: dir.path().join("out"),
        };
        assert!(matches!(run_undistort(&cfg), Err(ArucamError::ImageNotFound(_))));
        assert!(!cfg.output_dir.exists());
    }
}
