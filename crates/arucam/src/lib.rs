//! High-level facade crate for the `arucam-*` workspace.
//!
//! This crate provides:
//! - re-exports of the camera/pose core and the marker crate,
//! - whole-frame undistortion with the valid-pixel crop and a side-by-side comparison,
//! - a marker tracker that estimates the pose of one target id per frame,
//! - a frame loop over recorded image sequences with pluggable sinks
//!   (annotated frames, JSON report, and with the `viewer` feature a rerun viewer).
//!
//! ## Quickstart
//!
//! ```no_run
//! use arucam::aruco::{DetectorParams, Dictionary, Matcher};
//! use arucam::core::CameraModel;
//! use arucam::track::MarkerTracker;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = arucam::detect::load_rgb("frame.png")?;
//! let dict = Dictionary::generate("ARUCAM_7X7_50", 50, 7, 0)?;
//! let tracker = MarkerTracker::new(
//!     CameraModel::tracking_default(),
//!     Matcher::with_correction_rate(dict, 0.6),
//!     DetectorParams::default(),
//!     15,
//!     0.05,
//! );
//!
//! if let Some(target) = tracker.process_frame(&frame).target {
//!     println!("{}\n{}", target.rotation_text, target.translation_text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `arucam::core`: camera model, undistortion, rotations, marker pose.
//! - `arucam::aruco`: dictionaries, marker detection and rendering.
//! - `arucam::undistort`: RGB frame undistortion and comparison output.
//! - `arucam::track`: per-frame tracking, sinks and the frame loop.
//! - `arucam::io`: JSON configs for the undistortion and tracking runs.

pub use arucam_aruco as aruco;
pub use arucam_core as core;

pub mod detect;
pub mod draw;
pub mod frames;
pub mod io;
pub mod track;
pub mod undistort;

#[cfg(feature = "viewer")]
pub mod viewer;

pub use detect::ArucamError;
