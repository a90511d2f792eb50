//! Planar-target camera calibration: homography initialization followed by a
//! joint Levenberg–Marquardt refinement of intrinsics and per-view poses.

use crate::init::{init_focal_lengths, planar_pose, planar_xy};
use crate::backend::{solve, step_size, NllsProblem, SolveOptions};
use crate::{CalibrationFlags, SolverError};
use calib_guide_core::{
    estimate_homography, ImageSize, Keyframe, PinholeCamera, Pose, INTRINSIC_COUNT,
};
use log::debug;
use nalgebra::{DMatrix, DVector, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Residual assigned to each coordinate of a point behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

/// Result of a successful calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOutput {
    /// RMS reprojection error in pixels: `sqrt(sum |r|² / N)`.
    pub rms: f64,
    pub camera: PinholeCamera,
    /// Board-to-camera pose per input view.
    pub poses: Vec<Pose>,
    /// Standard deviation per intrinsic, zero for fixed parameters.
    pub std_intrinsics: [f64; INTRINSIC_COUNT],
    pub point_count: usize,
    pub evaluations: usize,
}

/// Camera calibration from planar target views.
pub trait CalibrationSolver {
    fn calibrate_camera(
        &self,
        views: &[Keyframe],
        image_size: ImageSize,
        flags: &CalibrationFlags,
        guess: &PinholeCamera,
    ) -> Result<CalibrationOutput, SolverError>;
}

/// Bundle-adjusting calibration solver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleCalibrator {
    pub lm: SolveOptions,
}

impl BundleCalibrator {
    pub fn new(lm: SolveOptions) -> Self {
        Self { lm }
    }

    fn initial_camera(
        &self,
        views: &[Keyframe],
        board_xy: &[Vec<Point2<f64>>],
        image_size: ImageSize,
        flags: &CalibrationFlags,
        guess: &PinholeCamera,
    ) -> Result<PinholeCamera, SolverError> {
        if flags.use_intrinsic_guess {
            return Ok(*guess);
        }

        let mut camera = *guess;
        camera.distortion = Default::default();
        let center = image_size.center();
        camera.intrinsics.cx = center.x;
        camera.intrinsics.cy = center.y;

        if flags.fix_focal_length {
            return Ok(camera);
        }

        let mut homographies = Vec::with_capacity(views.len());
        for (view, (kf, xy)) in views.iter().zip(board_xy).enumerate() {
            let h = estimate_homography(xy, kf.image_points())
                .ok_or(SolverError::DegenerateView { view })?;
            homographies.push(h);
        }

        let aspect = flags
            .fix_aspect_ratio
            .then(|| guess.intrinsics.fx / guess.intrinsics.fy);
        match init_focal_lengths(&homographies, center, aspect) {
            Some((fx, fy)) => {
                camera.intrinsics.fx = fx;
                camera.intrinsics.fy = fy;
            }
            None => debug!(
                "focal init degenerate for {} views, keeping guess fx={:.1} fy={:.1}",
                views.len(),
                camera.intrinsics.fx,
                camera.intrinsics.fy
            ),
        }
        Ok(camera)
    }
}

impl CalibrationSolver for BundleCalibrator {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(views = views.len()))
    )]
    fn calibrate_camera(
        &self,
        views: &[Keyframe],
        image_size: ImageSize,
        flags: &CalibrationFlags,
        guess: &PinholeCamera,
    ) -> Result<CalibrationOutput, SolverError> {
        if views.is_empty() {
            return Err(SolverError::NoViews);
        }
        let total: usize = views.iter().map(Keyframe::len).sum();
        if total <= 4 {
            return Err(SolverError::InsufficientPoints { total });
        }

        let board_xy = views
            .iter()
            .enumerate()
            .map(|(view, kf)| {
                planar_xy(kf.object_points()).ok_or(SolverError::NonPlanarTarget { view })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut camera = self.initial_camera(views, &board_xy, image_size, flags, guess)?;
        if flags.zero_tangent_dist {
            camera.distortion.p1 = 0.0;
            camera.distortion.p2 = 0.0;
        }

        let mut poses = Vec::with_capacity(views.len());
        for (view, (kf, xy)) in views.iter().zip(&board_xy).enumerate() {
            let pose = planar_pose(xy, kf.image_points(), &camera)
                .ok_or(SolverError::DegenerateView { view })?;
            poses.push(pose);
        }

        let problem = CalibrationProblem::new(views, flags, &camera);
        let x0 = problem.pack(&camera, &poses);
        if problem.rows < x0.len() {
            return Err(SolverError::InsufficientPoints { total });
        }
        let report = solve(&problem, x0, &self.lm);

        let params = problem.unpack_intrinsics(&report.params);
        let camera = PinholeCamera::from_params(&params);
        if !camera.is_finite() || !report.cost.is_finite() {
            return Err(SolverError::Diverged);
        }
        let poses: Vec<Pose> = (0..views.len())
            .map(|v| problem.view_pose(&report.params, v))
            .collect();

        let rms = (report.cost / total as f64).sqrt();
        let std_intrinsics = problem.intrinsic_std(&report.params, report.cost);

        debug!(
            "calibrated {} views / {} points: rms={:.4}px after {} evaluations (converged={})",
            views.len(),
            total,
            rms,
            report.evaluations,
            report.converged
        );

        Ok(CalibrationOutput {
            rms,
            camera,
            poses,
            std_intrinsics,
            point_count: total,
            evaluations: report.evaluations,
        })
    }
}

/// Joint reprojection problem. Parameter vector layout: free intrinsics (in
/// `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` order) followed by six pose
/// parameters `[rvec, tvec]` per view.
struct CalibrationProblem<'a> {
    views: &'a [Keyframe],
    base: [f64; INTRINSIC_COUNT],
    free_idx: Vec<usize>,
    /// `fx = aspect * fy` when set.
    aspect: Option<f64>,
    row_offsets: Vec<usize>,
    rows: usize,
}

impl<'a> CalibrationProblem<'a> {
    fn new(views: &'a [Keyframe], flags: &CalibrationFlags, camera: &PinholeCamera) -> Self {
        let free_idx = flags
            .free_mask()
            .iter()
            .enumerate()
            .filter_map(|(i, &free)| free.then_some(i))
            .collect();
        let aspect = (flags.fix_aspect_ratio && !flags.fix_focal_length)
            .then(|| camera.intrinsics.fx / camera.intrinsics.fy);

        let mut row_offsets = Vec::with_capacity(views.len());
        let mut rows = 0;
        for kf in views {
            row_offsets.push(rows);
            rows += 2 * kf.len();
        }

        Self {
            views,
            base: camera.to_params(),
            free_idx,
            aspect,
            row_offsets,
            rows,
        }
    }

    #[inline]
    fn intrinsic_count(&self) -> usize {
        self.free_idx.len()
    }

    fn pack(&self, camera: &PinholeCamera, poses: &[Pose]) -> DVector<f64> {
        let p = camera.to_params();
        let n = self.intrinsic_count();
        let mut x = DVector::zeros(n + 6 * poses.len());
        for (k, &i) in self.free_idx.iter().enumerate() {
            x[k] = p[i];
        }
        for (v, pose) in poses.iter().enumerate() {
            x.rows_mut(n + 6 * v, 6)
                .copy_from_slice(&pose.to_array());
        }
        x
    }

    fn unpack_intrinsics(&self, x: &DVector<f64>) -> [f64; INTRINSIC_COUNT] {
        let mut p = self.base;
        for (k, &i) in self.free_idx.iter().enumerate() {
            p[i] = x[k];
        }
        if let Some(a) = self.aspect {
            p[0] = a * p[1];
        }
        p
    }

    fn view_pose(&self, x: &DVector<f64>, view: usize) -> Pose {
        let start = self.intrinsic_count() + 6 * view;
        Pose::from_slice(&x.as_slice()[start..start + 6])
    }

    fn view_residuals(&self, camera: &PinholeCamera, pose: &Pose, view: usize, out: &mut [f64]) {
        let kf = &self.views[view];
        for (k, (obj, img)) in kf.object_points().iter().zip(kf.image_points()).enumerate() {
            match camera.project(pose, obj) {
                Some(p) => {
                    out[2 * k] = p.x - img.x;
                    out[2 * k + 1] = p.y - img.y;
                }
                None => {
                    out[2 * k] = BEHIND_CAMERA_RESIDUAL;
                    out[2 * k + 1] = BEHIND_CAMERA_RESIDUAL;
                }
            }
        }
    }

    fn view_rows(&self, view: usize) -> std::ops::Range<usize> {
        let start = self.row_offsets[view];
        start..start + 2 * self.views[view].len()
    }

    /// Parameter std-devs from `(JᵀJ)⁻¹ σ²`, `σ² = cost / (2N - n)`.
    fn intrinsic_std(&self, x: &DVector<f64>, cost: f64) -> [f64; INTRINSIC_COUNT] {
        let mut std = [0.0; INTRINSIC_COUNT];
        let n = self.intrinsic_count();
        if n == 0 {
            return std;
        }
        let jac = self.jacobian(x);
        let jtj = jac.transpose() * &jac;
        let cov = match jtj.clone().try_inverse() {
            Some(inv) => inv,
            None => match jtj.pseudo_inverse(1e-12) {
                Ok(pinv) => pinv,
                Err(_) => return [f64::NAN; INTRINSIC_COUNT],
            },
        };
        let dof = self.rows.saturating_sub(x.len()).max(1);
        let sigma2 = cost / dof as f64;
        for (k, &i) in self.free_idx.iter().enumerate() {
            std[i] = (cov[(k, k)] * sigma2).max(0.0).sqrt();
        }
        if let Some(a) = self.aspect {
            std[0] = a.abs() * std[1];
        }
        std
    }
}

impl NllsProblem for CalibrationProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let camera = PinholeCamera::from_params(&self.unpack_intrinsics(x));
        let mut r = DVector::zeros(self.rows);
        for view in 0..self.views.len() {
            let pose = self.view_pose(x, view);
            let rows = self.view_rows(view);
            self.view_residuals(&camera, &pose, view, &mut r.as_mut_slice()[rows]);
        }
        r
    }

    /// Central differences that exploit the block structure: a pose column
    /// only touches the rows of its own view.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = self.intrinsic_count();
        let mut jac = DMatrix::zeros(self.rows, x.len());
        let mut xp = x.clone();

        for c in 0..n {
            let h = step_size(x[c]);
            xp[c] = x[c] + h;
            let rp = self.residuals(&xp);
            xp[c] = x[c] - h;
            let rm = self.residuals(&xp);
            xp[c] = x[c];
            jac.set_column(c, &((rp - rm) / (2.0 * h)));
        }

        let camera = PinholeCamera::from_params(&self.unpack_intrinsics(x));
        for view in 0..self.views.len() {
            let rows = self.view_rows(view);
            let len = rows.len();
            let mut rp = vec![0.0; len];
            let mut rm = vec![0.0; len];
            let base = self.view_pose(x, view).to_array();
            for k in 0..6 {
                let h = step_size(base[k]);
                let mut p = base;
                p[k] = base[k] + h;
                self.view_residuals(&camera, &Pose::from_slice(&p), view, &mut rp);
                p[k] = base[k] - h;
                self.view_residuals(&camera, &Pose::from_slice(&p), view, &mut rm);
                let col = n + 6 * view + k;
                for (i, row) in rows.clone().enumerate() {
                    jac[(row, col)] = (rp[i] - rm[i]) / (2.0 * h);
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use calib_guide_core::{Distortion, Intrinsics};
    use nalgebra::{Point3, Vector3};

    fn truth() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 820.0,
                fy: 815.0,
                cx: 318.0,
                cy: 243.0,
            },
            Distortion {
                k1: -0.12,
                k2: 0.03,
                p1: 0.0005,
                p2: -0.0003,
                k3: 0.0,
            },
        )
    }

    fn board_points() -> Vec<Point3<f64>> {
        (1..7)
            .flat_map(|j| (1..11).map(move |i| Point3::new(i as f64 * 20.0, j as f64 * 20.0, 0.0)))
            .collect()
    }

    fn view(cam: &PinholeCamera, pose: &Pose) -> Keyframe {
        let obj = board_points();
        let img = obj
            .iter()
            .map(|p| cam.project(pose, p).expect("visible"))
            .collect();
        Keyframe::new(img, obj).expect("keyframe")
    }

    fn poses() -> Vec<Pose> {
        vec![
            Pose::new(Vector3::new(0.35, 0.1, 0.02), Vector3::new(-110.0, -70.0, 450.0)),
            Pose::new(Vector3::new(-0.05, 0.45, -0.1), Vector3::new(-120.0, -60.0, 480.0)),
            Pose::new(Vector3::new(0.25, -0.3, 0.15), Vector3::new(-100.0, -80.0, 500.0)),
            Pose::new(Vector3::new(-0.3, -0.2, 0.3), Vector3::new(-90.0, -75.0, 420.0)),
        ]
    }

    #[test]
    fn recovers_intrinsics_from_exact_views() {
        let cam = truth();
        let views: Vec<Keyframe> = poses().iter().map(|p| view(&cam, p)).collect();
        let guess = PinholeCamera::default_for_image(ImageSize::new(640, 480), 1000.0);

        let out = BundleCalibrator::default()
            .calibrate_camera(
                &views,
                ImageSize::new(640, 480),
                &CalibrationFlags::all_free(),
                &guess,
            )
            .expect("calibration");

        assert!(out.rms < 1e-3, "rms {}", out.rms);
        assert_abs_diff_eq!(out.camera.intrinsics.fx, 820.0, epsilon = 0.5);
        assert_abs_diff_eq!(out.camera.intrinsics.fy, 815.0, epsilon = 0.5);
        assert_abs_diff_eq!(out.camera.intrinsics.cx, 318.0, epsilon = 0.5);
        assert_abs_diff_eq!(out.camera.distortion.k1, -0.12, epsilon = 1e-2);
        assert_eq!(out.poses.len(), 4);
        assert!(out.std_intrinsics.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn fixed_parameters_keep_guess_and_zero_std() {
        let cam = truth();
        let views = vec![view(&cam, &poses()[0])];
        let guess = PinholeCamera::default_for_image(ImageSize::new(640, 480), 1000.0);
        let flags = CalibrationFlags {
            fix_aspect_ratio: true,
            fix_principal_point: true,
            zero_tangent_dist: true,
            fix_k1: true,
            fix_k2: true,
            fix_k3: true,
            ..CalibrationFlags::default()
        };

        let out = BundleCalibrator::default()
            .calibrate_camera(&views, ImageSize::new(640, 480), &flags, &guess)
            .expect("calibration");

        let k = out.camera.intrinsics;
        assert_abs_diff_eq!(k.fx, k.fy, epsilon = 1e-9);
        assert_eq!(k.cx, 319.5);
        assert_eq!(k.cy, 239.5);
        assert_eq!(out.camera.distortion, Distortion::ZERO);
        assert_eq!(out.std_intrinsics[2..], [0.0; 7]);
        assert!(out.std_intrinsics[1] > 0.0);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let guess = PinholeCamera::default_for_image(ImageSize::new(640, 480), 1000.0);
        let err = BundleCalibrator::default()
            .calibrate_camera(
                &[],
                ImageSize::new(640, 480),
                &CalibrationFlags::all_free(),
                &guess,
            )
            .unwrap_err();
        assert_eq!(err, SolverError::NoViews);
    }
}
