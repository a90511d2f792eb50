//! Rigid board-to-camera transform in axis-angle form.

use nalgebra::{Isometry3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Object-to-camera pose: `p_cam = R(rvec) * p_obj + tvec`.
///
/// `rvec` is a rotation vector (axis scaled by angle in radians).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Goes through a unit quaternion, which stays well defined for
    /// half turns and for matrices that are only nearly orthonormal.
    pub fn from_rotation(rotation: &Rotation3<f64>, tvec: Vector3<f64>) -> Self {
        let q = UnitQuaternion::from_rotation_matrix(rotation);
        Self::new(q.scaled_axis(), tvec)
    }

    /// Build from a 6-vector `[rx, ry, rz, tx, ty, tz]`.
    pub fn from_slice(p: &[f64]) -> Self {
        Self::new(
            Vector3::new(p[0], p[1], p[2]),
            Vector3::new(p[3], p[4], p[5]),
        )
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.rvec.x,
            self.rvec.y,
            self.rvec.z,
            self.tvec.x,
            self.tvec.y,
            self.tvec.z,
        ]
    }

    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    #[inline]
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_scaled_axis(self.rvec)
    }

    /// Angle in radians of the rotation taking `self` to `other`, in `[0, π]`.
    pub fn rotation_angle_to(&self, other: &Pose) -> f64 {
        self.quaternion().angle_to(&other.quaternion())
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.tvec
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.tvec),
            self.quaternion(),
        )
    }

    /// Euler angles `(roll, pitch, yaw)` in degrees, for
    /// `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
    pub fn euler_degrees(&self) -> [f64; 3] {
        let (r, p, y) = self.rotation().euler_angles();
        [r.to_degrees(), p.to_degrees(), y.to_degrees()]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Interpolate between two poses: slerp on rotation, lerp on translation.
    pub fn interpolate(&self, other: &Pose, t: f64) -> Pose {
        let q0 = self.quaternion();
        let q1 = other.quaternion();
        let t = t.clamp(0.0, 1.0);
        // Antipodal rotations have no unique slerp path; snap instead.
        let q = q0
            .try_slerp(&q1, t, 1e-9)
            .unwrap_or(if t < 0.5 { q0 } else { q1 });
        Pose::new(q.scaled_axis(), self.tvec.lerp(&other.tvec, t))
    }
}
