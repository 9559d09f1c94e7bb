//! ArUco-style square fiducial markers: dictionaries, detection and rendering.
//!
//! The detection pipeline runs on a grayscale view:
//! - adaptive thresholding at several window sizes,
//! - border following and polygon approximation into convex quads,
//! - perspective removal and per-cell bit reading,
//! - identification against a [`Dictionary`] in all four rotations.
//!
//! ```no_run
//! use arucam_aruco::{Dictionary, DetectorParams, MarkerDetector};
//! use arucam_core::GrayImage;
//!
//! let dict = Dictionary::generate("ARUCAM_7X7_50", 50, 7, 0).unwrap();
//! let detector = MarkerDetector::new(dict, DetectorParams::default());
//! let img = GrayImage::filled(640, 480, 255);
//! let detections = detector.detect(&img.view());
//! println!("found ids {:?}", detections.ids());
//! ```

mod contours;
mod detector;
mod dictionary;
mod matcher;
mod render;
mod threshold;

pub use contours::{approx_polygon_closed, find_contours, is_convex, BorderKind, Contour};
pub use detector::{
    detect_markers, DetectedMarker, DetectorParams, MarkerDetections, MarkerDetector,
};
pub use dictionary::{Dictionary, DictionaryError, DictionarySource, GeneratedDictionary};
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use render::{render_marker, RenderError};
pub use threshold::adaptive_threshold_inv;
