//! Per-frame marker pose tracking and the frame loop that drives it.

use crate::aruco::{DetectedMarker, DetectorParams, Matcher, MarkerDetections, MarkerDetector};
use crate::core::{
    estimate_marker_pose, rvec_to_euler_deg, CameraModel, EulerAngles, GrayImageView, MarkerPose,
    PoseParams,
};
use crate::detect::{gray_view, to_gray, ArucamError};
use crate::draw::{draw_frame_axes, draw_marker_outline};
use crate::frames::{Frame, FrameSource};
use crate::io::{write_json, TrackConfig};
use ::image::RgbImage;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Pose of the tracked marker in one frame.
#[derive(Clone, Debug)]
pub struct TargetPose {
    pub id: u32,
    pub corners: [Point2<f32>; 4],
    pub pose: MarkerPose,
    pub euler: EulerAngles,
    /// `"Rot: [[..], [..], [..]]"`, two decimals.
    pub rotation_text: String,
    /// `"Trans: [..]"`, two decimals.
    pub translation_text: String,
}

#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    pub detections: MarkerDetections,
    /// `None` when no marker was seen, none carried the target id, or its
    /// pose could not be estimated.
    pub target: Option<TargetPose>,
}

/// Round to two decimals without producing `-0.00`.
fn fmt2(v: f64) -> String {
    let r = (v * 100.0).round() / 100.0;
    let r = if r == 0.0 { 0.0 } else { r };
    format!("{:.2}", r)
}

fn fmt_row(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|&v| fmt2(v)).collect();
    format!("[{}]", items.join(", "))
}

pub fn format_rotation(r: &Matrix3<f64>) -> String {
    let rows: Vec<String> = (0..3)
        .map(|i| fmt_row(&[r[(i, 0)], r[(i, 1)], r[(i, 2)]]))
        .collect();
    format!("Rot: [{}]", rows.join(", "))
}

pub fn format_translation(t: &Vector3<f64>) -> String {
    format!("Trans: {}", fmt_row(t.as_slice()))
}

/// Detects markers and estimates the pose of one target id.
#[derive(Clone, Debug)]
pub struct MarkerTracker {
    camera: CameraModel,
    detector: MarkerDetector,
    pose_params: PoseParams,
    target_id: u32,
    marker_length: f64,
}

impl MarkerTracker {
    pub fn new(
        camera: CameraModel,
        matcher: Matcher,
        params: DetectorParams,
        target_id: u32,
        marker_length: f64,
    ) -> Self {
        Self {
            camera,
            detector: MarkerDetector::from_matcher(matcher, params),
            pose_params: PoseParams::default(),
            target_id,
            marker_length,
        }
    }

    pub fn with_pose_params(mut self, params: PoseParams) -> Self {
        self.pose_params = params;
        self
    }

    /// Build the camera, dictionary and detector named by a tracking config.
    pub fn from_config(cfg: &TrackConfig) -> Result<Self, ArucamError> {
        let camera = cfg.camera.to_model()?;
        let dict = cfg.dictionary.load()?;
        log::info!(
            "dictionary {} ({} markers, {}x{} bits)",
            dict.name,
            dict.len(),
            dict.marker_size,
            dict.marker_size
        );
        let matcher = Matcher::with_correction_rate(dict, cfg.detector.error_correction_rate);
        Ok(Self::new(
            camera,
            matcher,
            cfg.detector.clone(),
            cfg.target_id,
            cfg.marker_length,
        )
        .with_pose_params(cfg.pose))
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn detector(&self) -> &MarkerDetector {
        &self.detector
    }

    pub fn target_id(&self) -> u32 {
        self.target_id
    }

    pub fn marker_length(&self) -> f64 {
        self.marker_length
    }

    pub fn process_frame(&self, rgb: &RgbImage) -> FrameResult {
        let gray = to_gray(rgb);
        self.process_gray(&gray_view(&gray))
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn process_gray(&self, img: &GrayImageView<'_>) -> FrameResult {
        let detections = self.detector.detect(img);
        let target = detections
            .find(self.target_id)
            .and_then(|m| self.target_pose(m));
        FrameResult { detections, target }
    }

    fn target_pose(&self, marker: &DetectedMarker) -> Option<TargetPose> {
        let pose = match estimate_marker_pose(
            &marker.corners,
            self.marker_length,
            &self.camera,
            &self.pose_params,
        ) {
            Ok(pose) => pose,
            Err(err) => {
                log::warn!("marker {}: pose estimation failed: {}", marker.id, err);
                return None;
            }
        };
        Some(TargetPose {
            id: marker.id,
            corners: marker.corners,
            euler: rvec_to_euler_deg(&pose.rvec),
            rotation_text: format_rotation(&pose.rotation),
            translation_text: format_translation(&pose.tvec),
            pose,
        })
    }

    /// Outline every detected marker and draw the target's axes.
    pub fn annotate(&self, rgb: &mut RgbImage, result: &FrameResult, axis_length: f64) {
        let thickness = (rgb.width().max(rgb.height()) / 400).max(1) as usize;
        for m in &result.detections.markers {
            draw_marker_outline(rgb, &m.corners, thickness);
        }
        if let Some(t) = &result.target {
            if !draw_frame_axes(rgb, &self.camera, &t.pose, axis_length, thickness + 1) {
                log::debug!("axes of marker {} fall behind the camera", t.id);
            }
        }
    }
}

/// Consumer of per-frame tracking results.
pub trait TrackSink {
    fn on_frame(
        &mut self,
        frame: &Frame,
        result: &FrameResult,
        tracker: &MarkerTracker,
    ) -> Result<(), ArucamError>;

    /// Called once after the loop ends.
    fn finish(&mut self) -> Result<(), ArucamError> {
        Ok(())
    }
}

/// Writes annotated frames as PNG files.
pub struct FrameWriter {
    dir: PathBuf,
    axis_length: f64,
}

impl FrameWriter {
    pub fn new(dir: impl Into<PathBuf>, axis_length: f64) -> Result<Self, ArucamError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, axis_length })
    }
}

impl TrackSink for FrameWriter {
    fn on_frame(
        &mut self,
        frame: &Frame,
        result: &FrameResult,
        tracker: &MarkerTracker,
    ) -> Result<(), ArucamError> {
        let mut annotated = frame.image.clone();
        tracker.annotate(&mut annotated, result, self.axis_length);
        annotated.save(self.dir.join(format!("frame_{:05}.png", frame.index)))?;
        Ok(())
    }
}

/// Pose sample of the target marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub id: u32,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
    /// Roll, pitch, yaw in degrees.
    pub euler_deg: [f64; 3],
    pub reprojection_rmse: f64,
    pub rotation_text: String,
    pub translation_text: String,
}

impl From<&TargetPose> for TrackSample {
    fn from(t: &TargetPose) -> Self {
        Self {
            id: t.id,
            rvec: t.pose.rvec.into(),
            tvec: t.pose.tvec.into(),
            euler_deg: t.euler.to_array(),
            reprojection_rmse: t.pose.reprojection_rmse,
            rotation_text: t.rotation_text.clone(),
            translation_text: t.translation_text.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackFrame {
    pub index: usize,
    pub path: PathBuf,
    pub marker_ids: Vec<u32>,
    #[serde(default)]
    pub sample: Option<TrackSample>,
}

/// JSON report of a tracking run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub target_id: u32,
    pub marker_length: f64,
    pub frames: Vec<TrackFrame>,
}

impl TrackReport {
    pub fn samples(&self) -> impl Iterator<Item = &TrackSample> {
        self.frames.iter().filter_map(|f| f.sample.as_ref())
    }
}

/// Collects a [`TrackReport`] and optionally writes it when the loop ends.
pub struct TrackRecorder {
    report: TrackReport,
    path: Option<PathBuf>,
}

impl TrackRecorder {
    pub fn new(target_id: u32, marker_length: f64, path: Option<PathBuf>) -> Self {
        Self {
            report: TrackReport {
                target_id,
                marker_length,
                frames: Vec::new(),
            },
            path,
        }
    }

    pub fn report(&self) -> &TrackReport {
        &self.report
    }

    pub fn into_report(self) -> TrackReport {
        self.report
    }
}

impl TrackSink for TrackRecorder {
    fn on_frame(
        &mut self,
        frame: &Frame,
        result: &FrameResult,
        _tracker: &MarkerTracker,
    ) -> Result<(), ArucamError> {
        self.report.frames.push(TrackFrame {
            index: frame.index,
            path: frame.path.clone(),
            marker_ids: result.detections.ids(),
            sample: result.target.as_ref().map(TrackSample::from),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ArucamError> {
        if let Some(path) = &self.path {
            write_json(path, &self.report)?;
            log::info!("wrote report {}", path.display());
        }
        Ok(())
    }
}

/// Counters of one tracking run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub frames: usize,
    pub frames_with_markers: usize,
    pub frames_with_target: usize,
    /// Frames that could not be read and were skipped.
    pub unreadable: usize,
    pub cancelled: bool,
}

/// Options of [`run_tracking`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopOptions {
    /// Sleep between frames.
    pub pause: Duration,
    pub max_frames: Option<usize>,
}

/// Drive `tracker` over `source` until it is exhausted, `max_frames` have
/// been processed or `cancel` is set. Frames without the target are passed
/// to the sinks like any other frame.
pub fn run_tracking(
    source: &mut dyn FrameSource,
    tracker: &MarkerTracker,
    sinks: &mut [Box<dyn TrackSink>],
    cancel: &AtomicBool,
    options: LoopOptions,
) -> Result<TrackSummary, ArucamError> {
    let mut summary = TrackSummary::default();

    loop {
        if cancel.load(Ordering::SeqCst) {
            log::info!("cancellation requested, stopping after {} frames", summary.frames);
            summary.cancelled = true;
            break;
        }
        if options.max_frames.is_some_and(|max| summary.frames >= max) {
            break;
        }
        let Some(next) = source.next_frame() else {
            break;
        };
        let frame = match next {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("skipping unreadable frame: {}", err);
                summary.unreadable += 1;
                continue;
            }
        };

        let result = tracker.process_frame(&frame.image);
        summary.frames += 1;
        if !result.detections.markers.is_empty() {
            summary.frames_with_markers += 1;
        }
        match &result.target {
            Some(t) => {
                summary.frames_with_target += 1;
                log::info!(
                    "frame {}: marker {} {} {} euler [{:.1}, {:.1}, {:.1}]",
                    frame.index,
                    t.id,
                    t.rotation_text,
                    t.translation_text,
                    t.euler.roll,
                    t.euler.pitch,
                    t.euler.yaw
                );
            }
            None => log::debug!(
                "frame {}: {} markers, target {} not found",
                frame.index,
                result.detections.markers.len(),
                tracker.target_id()
            ),
        }

        for sink in sinks.iter_mut() {
            sink.on_frame(&frame, &result, tracker)?;
        }

        if !options.pause.is_zero() {
            std::thread::sleep(options.pause);
        }
    }

    for sink in sinks.iter_mut() {
        sink.finish()?;
    }
    Ok(summary)
}
