//! Core geometry for arucam.
//!
//! This crate is purely geometric and does not depend on any concrete image
//! type: a pinhole camera with Brown-Conrady distortion, whole-image
//! undistortion, homographies, rotation conversions and square-marker pose.

mod camera;
mod homography;
mod image;
mod logger;
pub mod pose;
pub mod rotation;
mod undistort;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, Distortion, UndistortConfig};
pub use homography::{
    estimate_homography, homography_from_4pt, homography_from_4pt_f64, warp_perspective_gray,
    Homography,
};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use pose::{
    estimate_marker_pose, marker_object_points, project_points, MarkerPose, PoseError, PoseParams,
};
pub use rotation::{euler_angles_deg, rvec_to_euler_deg, EulerAngles};
pub use undistort::{optimal_new_camera_matrix, Roi, UndistortMap};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
