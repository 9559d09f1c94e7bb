//! Rotation-vector (Rodrigues) and Euler-angle conversions.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Below this value of `sqrt(R00^2 + R10^2)` the pitch is treated as +-90 deg
/// and yaw is folded into roll.
pub const GIMBAL_LOCK_EPS: f64 = 1e-6;

/// Roll / pitch / yaw in degrees, as rotations about X, Y and Z.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub fn to_array(&self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }
}

/// Axis-angle vector (direction = axis, norm = angle in radians) to a rotation matrix.
pub fn rodrigues_to_matrix(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*rvec).into_inner()
}

/// Rotation matrix to axis-angle vector. The input is re-orthonormalized first.
pub fn matrix_to_rodrigues(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(r).scaled_axis()
}

/// Decompose `R = Rz(yaw) * Ry(pitch) * Rx(roll)` and report degrees.
pub fn euler_angles_deg(r: &Matrix3<f64>) -> EulerAngles {
    let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();
    let (x, y, z) = if sy < GIMBAL_LOCK_EPS {
        (
            (-r[(1, 2)]).atan2(r[(1, 1)]),
            (-r[(2, 0)]).atan2(sy),
            0.0,
        )
    } else {
        (
            r[(2, 1)].atan2(r[(2, 2)]),
            (-r[(2, 0)]).atan2(sy),
            r[(1, 0)].atan2(r[(0, 0)]),
        )
    };
    EulerAngles {
        roll: x.to_degrees(),
        pitch: y.to_degrees(),
        yaw: z.to_degrees(),
    }
}

pub fn rvec_to_euler_deg(rvec: &Vector3<f64>) -> EulerAngles {
    euler_angles_deg(&rodrigues_to_matrix(rvec))
}
