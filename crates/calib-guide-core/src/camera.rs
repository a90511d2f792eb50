//! Pinhole camera with Brown–Conrady distortion.
//!
//! Parameter order follows the common `fx, fy, cx, cy, k1, k2, p1, p2, k3`
//! convention, which is also the order of [`PinholeCamera::to_params`].

use crate::Pose;
use nalgebra::{Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Number of intrinsic parameters (4 projection + 5 distortion).
pub const INTRINSIC_COUNT: usize = 9;

/// Image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `(width, height)` as floats.
    #[inline]
    pub fn as_f64(&self) -> [f64; 2] {
        [self.width as f64, self.height as f64]
    }

    /// Geometric image center `((w - 1) / 2, (h - 1) / 2)`.
    #[inline]
    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            (self.width as f64 - 1.0) * 0.5,
            (self.height as f64 - 1.0) * 0.5,
        )
    }

    #[inline]
    pub fn contains(&self, p: &Point2<f64>) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= self.width as f64 - 1.0 && p.y <= self.height as f64 - 1.0
    }
}

/// Projection parameters of the camera matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// 3x3 camera matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Camera matrix as 9 row-major values.
    pub fn k_row_major(&self) -> [f64; 9] {
        [
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        ]
    }

    /// Intrinsics for an image rescaled by `(sx, sy)`.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}

/// Radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub const ZERO: Distortion = Distortion {
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
        k3: 0.0,
    };

    pub fn as_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_array().iter().all(|&c| c == 0.0)
    }

    /// Map an ideal normalized point to its distorted normalized position.
    #[inline]
    pub fn distort(&self, p: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy2 = 2.0 * x * y;
        Vector2::new(
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2,
        )
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, pd: Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return pd;
        }
        let mut p = pd;
        for _ in 0..20 {
            let (x, y) = (p.x, p.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            if radial.abs() < 1e-12 {
                break;
            }
            let next = Vector2::new((pd.x - dx) / radial, (pd.y - dy) / radial);
            if !next.x.is_finite() || !next.y.is_finite() {
                break;
            }
            let step = (next - p).norm();
            p = next;
            if step < 1e-12 {
                break;
            }
        }
        p
    }
}

/// Full camera model: projection plus lens distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
}

impl PinholeCamera {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Default guess for an uncalibrated camera: `fx = fy = focal`, principal
    /// point at the image center and no distortion.
    pub fn default_for_image(size: ImageSize, focal: f64) -> Self {
        let c = size.center();
        Self::new(
            Intrinsics {
                fx: focal,
                fy: focal,
                cx: c.x,
                cy: c.y,
            },
            Distortion::ZERO,
        )
    }

    /// Parameters as `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    pub fn to_params(&self) -> [f64; INTRINSIC_COUNT] {
        let k = &self.intrinsics;
        let d = &self.distortion;
        [k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.p1, d.p2, d.k3]
    }

    pub fn from_params(p: &[f64; INTRINSIC_COUNT]) -> Self {
        Self::new(
            Intrinsics {
                fx: p[0],
                fy: p[1],
                cx: p[2],
                cy: p[3],
            },
            Distortion::from_array([p[4], p[5], p[6], p[7], p[8]]),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.to_params().iter().all(|v| v.is_finite())
    }

    /// Project a normalized (pre-distortion) point to pixels.
    #[inline]
    pub fn project_normalized(&self, p: Vector2<f64>) -> Point2<f64> {
        let d = self.distortion.distort(p);
        let k = &self.intrinsics;
        Point2::new(k.fx * d.x + k.cx, k.fy * d.y + k.cy)
    }

    /// Project a point given in camera coordinates. `None` behind the camera.
    #[inline]
    pub fn project_camera_point(&self, pc: &Point3<f64>) -> Option<Point2<f64>> {
        if pc.z <= 1e-12 {
            return None;
        }
        Some(self.project_normalized(Vector2::new(pc.x / pc.z, pc.y / pc.z)))
    }

    /// Project a point given in the object frame observed under `pose`.
    #[inline]
    pub fn project(&self, pose: &Pose, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_camera_point(&pose.transform_point(p))
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Vector2<f64> {
        let k = &self.intrinsics;
        let pd = Vector2::new((pixel.x - k.cx) / k.fx, (pixel.y - k.cy) / k.fy);
        self.distortion.undistort(pd)
    }

    /// Back-project a pixel to the camera-frame point at depth `z`.
    pub fn unproject(&self, pixel: &Point2<f64>, z: f64) -> Point3<f64> {
        let n = self.normalize(pixel);
        Point3::new(n.x * z, n.y * z, z)
    }
}
