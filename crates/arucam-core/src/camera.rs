//! Pinhole camera with radial-tangential (Brown-Conrady) distortion.
//!
//! Conventions follow the usual calibration output: the intrinsic matrix is
//! `[[fx, s, cx], [0, fy, cy], [0, 0, 1]]` and distortion coefficients come in
//! the order `k1, k2, p1, p2, k3`. Normalized coordinates are `(X/Z, Y/Z)`.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Errors raised when building a camera model from raw calibration data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("focal lengths must be positive and finite (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },

    #[error("camera matrix contains non-finite values")]
    NonFinite,

    #[error("camera matrix must end with the row [0, 0, 1], got {0:?}")]
    InvalidLastRow([f64; 3]),

    #[error("camera matrix must have a zero below-diagonal entry (m[1][0]={0})")]
    InvalidLowerEntry(f64),

    #[error("expected 0, 4 or 5 distortion coefficients, got {0}")]
    DistortionLength(usize),
}

/// Pinhole intrinsics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        if ![self.fx, self.fy, self.cx, self.cy, self.skew]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(CameraError::NonFinite);
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, self.skew, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Point2::new(x, y)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * p.x + self.skew * p.y + self.cx,
            self.fy * p.y + self.cy,
        )
    }
}

/// Brown-Conrady distortion with 3 radial and 2 tangential terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Build from an OpenCV-ordered coefficient slice (`[]`, 4 or 5 values).
    pub fn from_coeffs(coeffs: &[f64]) -> Result<Self, CameraError> {
        let d = match *coeffs {
            [] => Self::default(),
            [k1, k2, p1, p2] => Self {
                k1,
                k2,
                p1,
                p2,
                k3: 0.0,
            },
            [k1, k2, p1, p2, k3] => Self { k1, k2, p1, p2, k3 },
            _ => return Err(CameraError::DistortionLength(coeffs.len())),
        };
        if !d.to_coeffs().iter().all(|v| v.is_finite()) {
            return Err(CameraError::NonFinite);
        }
        Ok(d)
    }

    pub fn to_coeffs(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.to_coeffs().iter().all(|&v| v == 0.0)
    }

    /// Apply the distortion to an undistorted normalized point.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    ///
    /// Returns `None` if the iteration produced non-finite values.
    pub fn undistort(&self, pd: Point2<f64>, cfg: &UndistortConfig) -> Option<Point2<f64>> {
        if self.is_zero() {
            return Some(pd);
        }
        let mut p = pd;
        for _ in 0..cfg.max_iters {
            let (x, y) = (p.x, p.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                return None;
            }
            let xy = x * y;
            let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
            let next = Point2::new((pd.x - dx) / radial, (pd.y - dy) / radial);
            if !(next.x.is_finite() && next.y.is_finite()) {
                return None;
            }
            let step = (next - p).norm_squared();
            p = next;
            if step < cfg.eps * cfg.eps {
                break;
            }
        }
        Some(p)
    }
}

/// Stopping criteria for iterative undistortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortConfig {
    pub max_iters: u32,
    pub eps: f64,
}

impl Default for UndistortConfig {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-12,
        }
    }
}

/// Intrinsics plus lens distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: Distortion,
    #[serde(default)]
    pub undistort: UndistortConfig,
}

impl CameraModel {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion) -> Result<Self, CameraError> {
        intrinsics.validate()?;
        Ok(Self {
            intrinsics,
            distortion,
            undistort: UndistortConfig::default(),
        })
    }

    /// Build from a 3x3 camera matrix (row-major) and an OpenCV-ordered
    /// distortion vector.
    pub fn from_opencv(matrix: [[f64; 3]; 3], coeffs: &[f64]) -> Result<Self, CameraError> {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CameraError::NonFinite);
        }
        if matrix[2] != [0.0, 0.0, 1.0] {
            return Err(CameraError::InvalidLastRow(matrix[2]));
        }
        if matrix[1][0] != 0.0 {
            return Err(CameraError::InvalidLowerEntry(matrix[1][0]));
        }
        let intrinsics = CameraIntrinsics {
            fx: matrix[0][0],
            fy: matrix[1][1],
            cx: matrix[0][2],
            cy: matrix[1][2],
            skew: matrix[0][1],
        };
        Self::new(intrinsics, Distortion::from_coeffs(coeffs)?)
    }

    /// Calibration used by the live marker trackers.
    pub fn tracking_default() -> Self {
        Self {
            intrinsics: CameraIntrinsics::new(4137.68736, 4164.39178, 1259.76349, 848.156504),
            distortion: Distortion {
                k1: -1.02243369,
                k2: -57.6494459,
                p1: -0.107094988,
                p2: -0.123742408,
                k3: 770.511502,
            },
            undistort: UndistortConfig::default(),
        }
    }

    /// Calibration used by the undistortion comparison.
    pub fn comparison_default() -> Self {
        Self {
            intrinsics: CameraIntrinsics::new(1758.16631, 1743.74606, 995.261535, 586.214872),
            distortion: Distortion {
                k1: 0.150497653,
                k2: -1.14192203,
                p1: -0.000838537659,
                p2: -0.00196202401,
                k3: 1.08294422,
            },
            undistort: UndistortConfig::default(),
        }
    }

    /// Map an undistorted normalized point to a distorted pixel.
    #[inline]
    pub fn project_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        self.intrinsics
            .normalized_to_pixel(self.distortion.distort(p))
    }

    /// Project a point in camera coordinates. `None` when it lies behind the camera.
    pub fn project_point(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(self.project_normalized(Point2::new(p.x / p.z, p.y / p.z)))
    }

    /// Distorted pixel to undistorted normalized coordinates.
    pub fn undistort_pixel(&self, px: Point2<f64>) -> Option<Point2<f64>> {
        let pd = self.intrinsics.pixel_to_normalized(px);
        self.distortion.undistort(pd, &self.undistort)
    }

    /// Distorted pixel to an undistorted pixel of another (distortion-free) camera.
    pub fn undistort_pixel_to(
        &self,
        px: Point2<f64>,
        target: &CameraIntrinsics,
    ) -> Option<Point2<f64>> {
        self.undistort_pixel(px)
            .map(|p| target.normalized_to_pixel(p))
    }
}
