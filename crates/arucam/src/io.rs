//! JSON configuration and report helpers for the undistortion and tracking runs.

use crate::aruco::{DetectorParams, DictionarySource};
use crate::core::{CameraError, CameraModel, PoseParams};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Read any JSON document from disk.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, IoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write a value as pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), IoError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Camera calibration in OpenCV layout: a row-major 3x3 matrix and the
/// `k1, k2, p1, p2[, k3]` distortion vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub dist_coeffs: Vec<f64>,
}

impl CameraConfig {
    pub fn from_model(model: &CameraModel) -> Self {
        Self {
            camera_matrix: model.intrinsics.to_array(),
            dist_coeffs: model.distortion.to_coeffs().to_vec(),
        }
    }

    /// Calibration of the camera used for marker tracking.
    pub fn tracking_default() -> Self {
        Self::from_model(&CameraModel::tracking_default())
    }

    /// Calibration of the camera used for the undistortion comparison.
    pub fn comparison_default() -> Self {
        Self::from_model(&CameraModel::comparison_default())
    }

    pub fn to_model(&self) -> Result<CameraModel, CameraError> {
        CameraModel::from_opencv(self.camera_matrix, &self.dist_coeffs)
    }
}

fn default_alpha() -> f64 {
    1.0
}

fn default_undistort_dir() -> PathBuf {
    PathBuf::from("undistort_out")
}

/// Configuration of the undistortion comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndistortConfig {
    pub image_path: PathBuf,
    #[serde(default = "CameraConfig::comparison_default")]
    pub camera: CameraConfig,
    /// Free scaling parameter of the new camera matrix (0 crops, 1 keeps all pixels).
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_undistort_dir")]
    pub output_dir: PathBuf,
}

impl UndistortConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        load_json(path)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(path, self)
    }
}

fn default_target_id() -> u32 {
    15
}

fn default_marker_length() -> f64 {
    0.05
}

fn default_axis_length() -> f64 {
    0.1
}

fn default_pause_ms() -> u64 {
    1
}

/// Configuration of a tracking run over a recorded frame sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Directory of frames (sorted by name) or a single image.
    pub frames: PathBuf,
    #[serde(default = "CameraConfig::tracking_default")]
    pub camera: CameraConfig,
    #[serde(default)]
    pub dictionary: DictionarySource,
    #[serde(default = "default_target_id")]
    pub target_id: u32,
    /// Marker side length; the translation comes out in the same unit.
    #[serde(default = "default_marker_length")]
    pub marker_length: f64,
    #[serde(default = "default_axis_length")]
    pub axis_length: f64,
    #[serde(default)]
    pub detector: DetectorParams,
    #[serde(default)]
    pub pose: PoseParams,
    /// Annotated frames are written here when set.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    /// Delay between frames.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    #[serde(default)]
    pub max_frames: Option<usize>,
    /// Stream frames and plots to a rerun viewer (requires the `viewer` feature).
    #[serde(default)]
    pub viewer: bool,
}

impl TrackConfig {
    pub fn new(frames: impl Into<PathBuf>) -> Self {
        Self {
            frames: frames.into(),
            camera: CameraConfig::tracking_default(),
            dictionary: DictionarySource::default(),
            target_id: default_target_id(),
            marker_length: default_marker_length(),
            axis_length: default_axis_length(),
            detector: DetectorParams::default(),
            pose: PoseParams::default(),
            output_dir: None,
            report_path: None,
            pause_ms: default_pause_ms(),
            max_frames: None,
            viewer: false,
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        load_json(path)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(path, self)
    }

    /// Resolve the report path: explicit, else `track_report.json` in the
    /// output directory, else none.
    pub fn report_path(&self) -> Option<PathBuf> {
        self.report_path.clone().or_else(|| {
            self.output_dir
                .as_ref()
                .map(|dir| dir.join("track_report.json"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aruco::GeneratedDictionary;

    #[test]
    fn minimal_track_config_uses_defaults() {
        let cfg: TrackConfig = serde_json::from_str(r#"{ "frames": "frames/" }"#).expect("parse");
        assert_eq!(cfg.target_id, 15);
        assert_eq!(cfg.marker_length, 0.05);
        assert_eq!(cfg.axis_length, 0.1);
        assert_eq!(cfg.pause_ms, 1);
        assert_eq!(cfg.dictionary, DictionarySource::Generated(GeneratedDictionary::default()));
        assert_eq!(cfg.camera.to_model().expect("camera"), CameraModel::tracking_default());
        assert_eq!(cfg.report_path(), None);
    }

    #[test]
    fn undistort_config_defaults_to_comparison_camera() {
        let cfg: UndistortConfig =
            serde_json::from_str(r#"{ "image_path": "a.png" }"#).expect("parse");
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.camera, CameraConfig::comparison_default());
        assert_eq!(cfg.output_dir, PathBuf::from("undistort_out"));
    }

    #[test]
    fn track_config_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("track.json");
        let mut cfg = TrackConfig::new("frames");
        cfg.output_dir = Some(PathBuf::from("out"));
        cfg.max_frames = Some(3);
        cfg.write_json(&path).expect("write");

        let back = TrackConfig::load_json(&path).expect("load");
        assert_eq!(back.max_frames, Some(3));
        assert_eq!(back.report_path(), Some(PathBuf::from("out/track_report.json")));
        assert_eq!(back.detector, cfg.detector);
    }

    #[test]
    fn camera_config_rejects_short_distortion() {
        let cfg = CameraConfig {
            camera_matrix: [[500.0, 0.0, 10.0], [0.0, 500.0, 10.0], [0.0, 0.0, 1.0]],
            dist_coeffs: vec![0.1, 0.2],
        };
        assert!(matches!(cfg.to_model(), Err(CameraError::DistortionLength(2))));
    }

    #[test]
    fn shipped_configs_parse() {
        let track: TrackConfig =
            serde_json::from_str(include_str!("../../../configs/track.json")).expect("track");
        let expected = CameraConfig::tracking_default();
        for (a, b) in track.camera.dist_coeffs.iter().zip(&expected.dist_coeffs) {
            approx::assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        approx::assert_relative_eq!(
            track.camera.camera_matrix[0][0],
            expected.camera_matrix[0][0],
            max_relative = 1e-12
        );

        let undistort: UndistortConfig =
            serde_json::from_str(include_str!("../../../configs/undistort.json")).expect("undistort");
        let model = undistort.camera.to_model().expect("camera");
        approx::assert_relative_eq!(
            model.intrinsics.cy,
            CameraModel::comparison_default().intrinsics.cy,
            max_relative = 1e-12
        );
    }
}
