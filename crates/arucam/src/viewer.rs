//! Live plots in a rerun viewer: annotated frames, the current target
//! position as a 3-D point and its Euler angles as a bar chart.

use crate::detect::ArucamError;
use crate::frames::Frame;
use crate::track::{FrameResult, MarkerTracker, TargetPose, TrackSink};

pub struct RerunViewer {
    rec: rerun::RecordingStream,
    axis_length: f64,
}

/// Point payload for `plots/position`: only the latest translation.
fn position_points(target: &TargetPose) -> [[f32; 3]; 1] {
    let t = target.pose.tvec;
    [[t.x as f32, t.y as f32, t.z as f32]]
}

impl RerunViewer {
    /// Spawn a viewer process and connect to it.
    pub fn spawn(app_id: &str, axis_length: f64) -> Result<Self, rerun::RecordingStreamError> {
        let rec = rerun::RecordingStreamBuilder::new(app_id).spawn()?;
        rec.log_static(
            "plots/info",
            &rerun::TextLog::new("roll, pitch, yaw in degrees, range [-180, 180]")
                .with_level(rerun::TextLogLevel::INFO),
        )?;
        Ok(Self { rec, axis_length })
    }

    fn log_frame(
        &mut self,
        frame: &Frame,
        result: &FrameResult,
        tracker: &MarkerTracker,
    ) -> Result<(), rerun::RecordingStreamError> {
        self.rec.set_time_sequence("frame", frame.index as i64);

        let mut annotated = frame.image.clone();
        tracker.annotate(&mut annotated, result, self.axis_length);
        self.rec.log(
            "camera/frame",
            &rerun::Image::from_elements(
                annotated.as_raw(),
                [annotated.width(), annotated.height()],
                rerun::ColorModel::RGB,
            ),
        )?;

        let Some(target) = &result.target else {
            return Ok(());
        };

        self.rec.log(
            "plots/position",
            &rerun::Points3D::new(position_points(target)).with_radii([0.002]),
        )?;

        let angles = target.euler.to_array();
        self.rec
            .log("plots/angles", &rerun::BarChart::new(angles.as_slice()))?;
        self.rec.log(
            "plots/pose",
            &rerun::TextLog::new(format!(
                "{} {}",
                target.rotation_text, target.translation_text
            )),
        )?;
        Ok(())
    }
}

impl TrackSink for RerunViewer {
    fn on_frame(
        &mut self,
        frame: &Frame,
        result: &FrameResult,
        tracker: &MarkerTracker,
    ) -> Result<(), ArucamError> {
        Ok(self.log_frame(frame, result, tracker)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EulerAngles, MarkerPose};
    use nalgebra::{Matrix3, Point2, Vector3};

    fn target_at(t: Vector3<f64>) -> TargetPose {
        TargetPose {
            id: 15,
            corners: [Point2::origin(); 4],
            pose: MarkerPose::from_rt(Matrix3::identity(), t),
            euler: EulerAngles {
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
            },
            rotation_text: String::new(),
            translation_text: String::new(),
        }
    }

    #[test]
    fn position_payload_holds_only_the_current_frame() {
        let first = position_points(&target_at(Vector3::new(0.1, -0.2, 0.5)));
        let second = position_points(&target_at(Vector3::new(0.0, 0.05, 0.75)));
        assert_eq!(first, [[0.1, -0.2, 0.5]]);
        assert_eq!(second, [[0.0, 0.05, 0.75]]);
    }
}
