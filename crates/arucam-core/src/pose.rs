//! Pose of a single square marker from its four image corners.
//!
//! The marker frame has its origin at the marker center, X to the right, Y up
//! and Z pointing out of the printed face (towards the camera when the marker
//! is visible). Corners are expected in the order top-left, top-right,
//! bottom-right, bottom-left.
//!
//! The solver undistorts the corners, decomposes the plane-to-image homography
//! into an initial pose, builds the mirrored candidate that planar targets
//! are notoriously ambiguous with, and refines both with Levenberg-Marquardt
//! on the pixel reprojection error through the full distortion model.

use crate::rotation::{matrix_to_rodrigues, rodrigues_to_matrix};
use crate::{homography_from_4pt_f64, CameraModel};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("marker side length must be positive and finite, got {0}")]
    InvalidMarkerLength(f64),

    #[error("marker corners are degenerate (area {area:.3} px^2)")]
    DegenerateCorners { area: f64 },

    #[error("corner {index} could not be undistorted")]
    Undistort { index: usize },

    #[error("plane-to-image homography is singular")]
    Homography,

    #[error("no pose places the marker in front of the camera")]
    BehindCamera,
}

/// Solver settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseParams {
    /// Levenberg-Marquardt iterations per candidate (0 disables refinement).
    pub max_iters: u32,
    /// Stop once the parameter step norm drops below this value.
    pub step_eps: f64,
    /// Also evaluate the mirrored planar solution.
    pub check_ambiguity: bool,
}

impl Default for PoseParams {
    fn default() -> Self {
        Self {
            max_iters: 50,
            step_eps: 1e-12,
            check_ambiguity: true,
        }
    }
}

/// Marker-to-camera transform: `X_cam = R * X_marker + t`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    /// Rodrigues rotation vector (radians).
    pub rvec: Vector3<f64>,
    /// Translation in the unit of the marker length.
    pub tvec: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    /// RMS corner reprojection error in pixels.
    pub reprojection_rmse: f64,
    /// RMS error of the rejected mirrored solution, when one was evaluated.
    pub alternate_rmse: Option<f64>,
}

impl MarkerPose {
    pub fn from_rt(rotation: Matrix3<f64>, tvec: Vector3<f64>) -> Self {
        Self {
            rvec: matrix_to_rodrigues(&rotation),
            tvec,
            rotation,
            reprojection_rmse: 0.0,
            alternate_rmse: None,
        }
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.rotation * p.coords + self.tvec
    }
}

/// Corner coordinates of a square marker of side `side` in its own frame.
pub fn marker_object_points(side: f64) -> [Point3<f64>; 4] {
    let s = side / 2.0;
    [
        Point3::new(-s, s, 0.0),
        Point3::new(s, s, 0.0),
        Point3::new(s, -s, 0.0),
        Point3::new(-s, -s, 0.0),
    ]
}

/// Project marker-frame points to pixels. `None` entries lie behind the camera.
pub fn project_points(
    camera: &CameraModel,
    pose: &MarkerPose,
    points: &[Point3<f64>],
) -> Vec<Option<Point2<f64>>> {
    points
        .iter()
        .map(|p| camera.project_point(&pose.transform(p)))
        .collect()
}

/// Estimate the pose of one square marker of side `marker_length`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(corners, camera, params))
)]
pub fn estimate_marker_pose(
    corners: &[Point2<f32>; 4],
    marker_length: f64,
    camera: &CameraModel,
    params: &PoseParams,
) -> Result<MarkerPose, PoseError> {
    if !(marker_length.is_finite() && marker_length > 0.0) {
        return Err(PoseError::InvalidMarkerLength(marker_length));
    }

    let observed = corners.map(|p| Point2::new(p.x as f64, p.y as f64));
    let area = polygon_area(&observed);
    if area.abs() < 1.0 {
        return Err(PoseError::DegenerateCorners { area });
    }

    let mut normalized = [Point2::origin(); 4];
    for (i, px) in observed.iter().enumerate() {
        normalized[i] = camera
            .undistort_pixel(*px)
            .ok_or(PoseError::Undistort { index: i })?;
    }

    let object = marker_object_points(marker_length);
    let plane = object.map(|p| Point2::new(p.x, p.y));
    let h = homography_from_4pt_f64(&plane, &normalized).ok_or(PoseError::Homography)?;
    let (r0, t0) = decompose_plane_homography(&h.h).ok_or(PoseError::Homography)?;

    let mut candidates = vec![(r0, t0)];
    if params.check_ambiguity {
        if let Some(r1) = mirrored_rotation(&r0, &t0) {
            candidates.push((r1, t0));
        }
    }

    let mut solutions: Vec<(Matrix3<f64>, Vector3<f64>, f64)> = candidates
        .into_iter()
        .filter_map(|(r, t)| {
            let (r, t) = refine_lm(&object, &observed, camera, r, t, params);
            let cost = reprojection_cost(&object, &observed, camera, &r, &t)?;
            Some((r, t, (cost / 4.0).sqrt()))
        })
        .collect();

    if solutions.is_empty() {
        return Err(PoseError::BehindCamera);
    }
    solutions.sort_by(|a, b| a.2.total_cmp(&b.2));

    let (r, t, rmse) = solutions[0];
    log::trace!(
        "marker pose: t=({:.4}, {:.4}, {:.4}) rmse={:.4}px candidates={}",
        t.x,
        t.y,
        t.z,
        rmse,
        solutions.len()
    );

    let mut pose = MarkerPose::from_rt(r, t);
    pose.reprojection_rmse = rmse;
    pose.alternate_rmse = solutions.get(1).map(|s| s.2);
    Ok(pose)
}

fn polygon_area(pts: &[Point2<f64>; 4]) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = pts[i];
        let b = pts[(i + 1) % 4];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

/// Nearest rotation in the Frobenius sense.
fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let flipped = -u.column(2).clone_owned();
        u.set_column(2, &flipped);
        r = u * v_t;
    }
    Some(r)
}

/// Split `H ~ [r1 r2 t]` (plane to normalized image) into a rotation and translation.
fn decompose_plane_homography(h: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm < 1e-12 {
        return None;
    }
    let mut scale = 1.0 / norm;
    if h3.z * scale < 0.0 {
        scale = -scale;
    }

    let r1 = h1 * scale;
    let r2 = h2 * scale;
    let r3 = r1.cross(&r2);
    let r = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some((r, h3 * scale))
}

/// The second planar solution: tilt the marker normal to its mirror image
/// about the line of sight through the marker center.
fn mirrored_rotation(r: &Matrix3<f64>, t: &Vector3<f64>) -> Option<Matrix3<f64>> {
    let view = t.try_normalize(1e-12)?;
    let normal = r.column(2).into_owned();
    let mirrored = 2.0 * normal.dot(&view) * view - normal;

    let axis = normal.cross(&mirrored);
    let sin = axis.norm();
    if sin < 1e-9 {
        return None;
    }
    let angle = sin.atan2(normal.dot(&mirrored));
    let q = Rotation3::from_scaled_axis(axis / sin * angle);
    Some(q.matrix() * r)
}

fn reprojection_residuals(
    object: &[Point3<f64>; 4],
    observed: &[Point2<f64>; 4],
    camera: &CameraModel,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
) -> Option<SVector<f64, 8>> {
    let mut res = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let pc = r * object[i].coords + t;
        let px = camera.project_point(&pc)?;
        res[2 * i] = px.x - observed[i].x;
        res[2 * i + 1] = px.y - observed[i].y;
    }
    Some(res)
}

fn reprojection_cost(
    object: &[Point3<f64>; 4],
    observed: &[Point2<f64>; 4],
    camera: &CameraModel,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
) -> Option<f64> {
    reprojection_residuals(object, observed, camera, r, t).map(|v| v.norm_squared())
}

/// Apply `[omega, dt]` as `R <- exp(omega) * R`, `t <- t + dt`.
fn apply_update(r: &Matrix3<f64>, t: &Vector3<f64>, d: &Vector6<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let omega = Vector3::new(d[0], d[1], d[2]);
    let dt = Vector3::new(d[3], d[4], d[5]);
    (rodrigues_to_matrix(&omega) * r, t + dt)
}

fn refine_lm(
    object: &[Point3<f64>; 4],
    observed: &[Point2<f64>; 4],
    camera: &CameraModel,
    mut r: Matrix3<f64>,
    mut t: Vector3<f64>,
    params: &PoseParams,
) -> (Matrix3<f64>, Vector3<f64>) {
    const DIFF_STEP: f64 = 1e-7;

    let Some(mut res) = reprojection_residuals(object, observed, camera, &r, &t) else {
        return (r, t);
    };
    let mut cost = res.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..params.max_iters {
        let mut jac = SMatrix::<f64, 8, 6>::zeros();
        for k in 0..6 {
            let mut d = Vector6::zeros();
            d[k] = DIFF_STEP;
            let (rp, tp) = apply_update(&r, &t, &d);
            let (rm, tm) = apply_update(&r, &t, &(-d));
            let (Some(fp), Some(fm)) = (
                reprojection_residuals(object, observed, camera, &rp, &tp),
                reprojection_residuals(object, observed, camera, &rm, &tm),
            ) else {
                return (r, t);
            };
            jac.set_column(k, &((fp - fm) / (2.0 * DIFF_STEP)));
        }

        let jtj = jac.transpose() * jac;
        let jtr = jac.transpose() * res;

        let mut accepted = None;
        while lambda < 1e12 {
            let mut a = jtj;
            for k in 0..6 {
                a[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let Some(step) = a.cholesky().map(|c| c.solve(&(-jtr))) else {
                lambda *= 10.0;
                continue;
            };
            let (rn, tn) = apply_update(&r, &t, &step);
            match reprojection_residuals(object, observed, camera, &rn, &tn) {
                Some(res_n) if res_n.norm_squared() < cost => {
                    accepted = Some((rn, tn, res_n, step.norm()));
                    lambda = (lambda * 0.1).max(1e-12);
                    break;
                }
                _ => lambda *= 10.0,
            }
        }

        let Some((rn, tn, res_n, step_norm)) = accepted else {
            break;
        };
        r = rn;
        t = tn;
        res = res_n;
        cost = res.norm_squared();
        if step_norm < params.step_eps || cost < 1e-24 {
            break;
        }
    }

    (r, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraIntrinsics, Distortion};
    use approx::assert_relative_eq;

    fn camera() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics::new(900.0, 905.0, 640.0, 360.0),
            Distortion {
                k1: -0.12,
                k2: 0.03,
                p1: 0.0008,
                p2: -0.0004,
                k3: 0.0,
            },
        )
        .expect("camera")
    }

    fn synth_corners(cam: &CameraModel, pose: &MarkerPose, side: f64) -> [Point2<f32>; 4] {
        let pts = project_points(cam, pose, &marker_object_points(side));
        let mut out = [Point2::new(0.0f32, 0.0); 4];
        for (o, p) in out.iter_mut().zip(pts) {
            let p = p.expect("in front of camera");
            *o = Point2::new(p.x as f32, p.y as f32);
        }
        out
    }

    fn facing_pose(tilt_x: f64, tilt_y: f64, t: Vector3<f64>) -> MarkerPose {
        // Start from "marker faces the camera" (180 deg about X), then tilt.
        let base = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        let tilt = Rotation3::from_axis_angle(&Vector3::x_axis(), tilt_x)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), tilt_y);
        MarkerPose::from_rt((tilt * base).into_inner(), t)
    }

    #[test]
    fn object_points_follow_corner_order() {
        let p = marker_object_points(0.05);
        assert_eq!(p[0], Point3::new(-0.025, 0.025, 0.0));
        assert_eq!(p[2], Point3::new(0.025, -0.025, 0.0));
    }

    #[test]
    fn recovers_tilted_pose_with_distortion() {
        let cam = camera();
        let truth = facing_pose(0.35, -0.25, Vector3::new(0.03, -0.02, 0.45));
        let corners = synth_corners(&cam, &truth, 0.05);

        let est = estimate_marker_pose(&corners, 0.05, &cam, &PoseParams::default())
            .expect("pose");
        assert_relative_eq!(est.tvec, truth.tvec, epsilon = 1e-4);
        assert_relative_eq!(est.rotation, truth.rotation, epsilon = 1e-3);
        assert!(est.reprojection_rmse < 1e-2, "rmse {}", est.reprojection_rmse);
        // the marker Z axis points back at the camera
        assert!(est.rotation[(2, 2)] < 0.0);
    }

    #[test]
    fn frontal_marker_has_no_mirrored_candidate() {
        let cam = camera();
        let truth = facing_pose(0.0, 0.0, Vector3::new(0.0, 0.0, 0.5));
        let corners = synth_corners(&cam, &truth, 0.05);
        let est = estimate_marker_pose(&corners, 0.05, &cam, &PoseParams::default())
            .expect("pose");
        assert_relative_eq!(est.tvec.z, 0.5, epsilon = 1e-4);
        assert_relative_eq!(est.rotation, truth.rotation, epsilon = 1e-3);
    }

    #[test]
    fn translation_scales_with_marker_length() {
        let cam = camera();
        let truth = facing_pose(0.2, 0.1, Vector3::new(-0.01, 0.015, 0.3));
        let corners = synth_corners(&cam, &truth, 0.05);
        let est = estimate_marker_pose(&corners, 0.1, &cam, &PoseParams::default())
            .expect("pose");
        assert_relative_eq!(est.tvec, truth.tvec * 2.0, epsilon = 2e-4);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let cam = camera();
        let corners = [Point2::new(10.0f32, 10.0); 4];
        assert_eq!(
            estimate_marker_pose(&corners, 0.05, &cam, &PoseParams::default()),
            Err(PoseError::DegenerateCorners { area: 0.0 })
        );
        let square = [
            Point2::new(0.0f32, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        assert_eq!(
            estimate_marker_pose(&square, -1.0, &cam, &PoseParams::default()),
            Err(PoseError::InvalidMarkerLength(-1.0))
        );
    }

    #[test]
    fn decomposition_inverts_composed_homography() {
        let r = Rotation3::from_euler_angles(2.9, 0.2, -0.4).into_inner();
        let t = Vector3::new(0.1, -0.05, 1.2);
        let h = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t])
            * -3.0;
        let (r_est, t_est) = decompose_plane_homography(&h).expect("decompose");
        assert_relative_eq!(r_est, r, epsilon = 1e-9);
        assert_relative_eq!(t_est, t, epsilon = 1e-9);
    }
}
