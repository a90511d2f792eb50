//! Pose of a planar target from 2D-3D correspondences.

use crate::init::{planar_pose, planar_xy};
use crate::backend::{solve, NllsProblem, SolveOptions};
use crate::PnpError;
use calib_guide_core::{PinholeCamera, Pose};
use nalgebra::{DVector, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Perspective-n-point solver interface.
pub trait PoseSolver {
    fn solve_pnp(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &PinholeCamera,
    ) -> Result<Pose, PnpError>;
}

/// Homography-initialized PnP for planar targets with an LM refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarPnp {
    /// Reject solutions whose RMS reprojection error exceeds this (pixels).
    pub max_rms_px: f64,
    pub lm: SolveOptions,
}

impl Default for PlanarPnp {
    fn default() -> Self {
        Self {
            max_rms_px: 10.0,
            lm: SolveOptions {
                max_iters: 30,
                ..SolveOptions::default()
            },
        }
    }
}

struct PoseProblem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    camera: &'a PinholeCamera,
}

impl NllsProblem for PoseProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let pose = Pose::from_slice(x.as_slice());
        let mut r = DVector::zeros(2 * self.object.len());
        for (k, (obj, img)) in self.object.iter().zip(self.image).enumerate() {
            let (dx, dy) = match self.camera.project(&pose, obj) {
                Some(p) => (p.x - img.x, p.y - img.y),
                None => (1e4, 1e4),
            };
            r[2 * k] = dx;
            r[2 * k + 1] = dy;
        }
        r
    }
}

impl PoseSolver for PlanarPnp {
    fn solve_pnp(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &PinholeCamera,
    ) -> Result<Pose, PnpError> {
        if object.len() != image.len() {
            return Err(PnpError::LengthMismatch {
                object: object.len(),
                image: image.len(),
            });
        }
        if object.len() < 4 {
            return Err(PnpError::InsufficientPoints {
                count: object.len(),
            });
        }
        let xy = planar_xy(object).ok_or(PnpError::NonPlanarTarget)?;
        let init = planar_pose(&xy, image, camera).ok_or(PnpError::Degenerate)?;

        let problem = PoseProblem {
            object,
            image,
            camera,
        };
        let x0 = DVector::from_row_slice(&init.to_array());
        let report = solve(&problem, x0, &self.lm);
        let pose = Pose::from_slice(report.params.as_slice());

        if !pose.is_finite() {
            return Err(PnpError::Degenerate);
        }
        if object
            .iter()
            .any(|p| pose.transform_point(p).z <= 0.0)
        {
            return Err(PnpError::BehindCamera);
        }
        let rms = (report.cost / object.len() as f64).sqrt();
        if !(rms <= self.max_rms_px) {
            return Err(PnpError::ExcessiveError {
                rms,
                max: self.max_rms_px,
            });
        }
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use calib_guide_core::{Distortion, Intrinsics};
    use nalgebra::Vector3;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 700.0,
                fy: 700.0,
                cx: 320.0,
                cy: 240.0,
            },
            Distortion {
                k1: -0.1,
                ..Distortion::ZERO
            },
        )
    }

    fn object() -> Vec<Point3<f64>> {
        (1..5)
            .flat_map(|j| (1..6).map(move |i| Point3::new(i as f64 * 25.0, j as f64 * 25.0, 0.0)))
            .collect()
    }

    #[test]
    fn recovers_pose_with_distortion() {
        let cam = camera();
        let truth = Pose::new(Vector3::new(2.9, 0.2, -0.1), Vector3::new(-70.0, 60.0, 400.0));
        let obj = object();
        let img: Vec<Point2<f64>> = obj
            .iter()
            .map(|p| cam.project(&truth, p).expect("visible"))
            .collect();

        let pose = PlanarPnp::default()
            .solve_pnp(&obj, &img, &cam)
            .expect("pose");
        assert_abs_diff_eq!((pose.tvec - truth.tvec).norm(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pose.rotation_angle_to(&truth), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn three_points_are_not_enough() {
        let obj = &object()[..3];
        let img = vec![Point2::new(0.0, 0.0); 3];
        assert_eq!(
            PlanarPnp::default().solve_pnp(obj, &img, &camera()),
            Err(PnpError::InsufficientPoints { count: 3 })
        );
    }
}
