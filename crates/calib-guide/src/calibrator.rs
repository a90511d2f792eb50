//! Incremental intrinsic calibration over the keyframe store.

use calib_guide_core::{
    index_of_dispersion_all, variance, ImageSize, Keyframe, PinholeCamera, Pose, INTRINSIC_COUNT,
};
use calib_guide_solver::{BundleCalibrator, CalibrationFlags, CalibrationSolver, SolverError};
use log::info;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// How a bootstrap calibration constrains the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStrategy {
    /// First view, tilted: only the focal length is estimated.
    Orbital,
    /// Second view, fronto-parallel and screen filling: distortion only.
    PlanarFullScreen,
}

/// Calibration phase, selecting the solver flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Bootstrap(BootstrapStrategy),
    Active,
}

impl CalibrationPhase {
    pub fn flags(self) -> CalibrationFlags {
        match self {
            CalibrationPhase::Bootstrap(BootstrapStrategy::Orbital) => CalibrationFlags {
                fix_aspect_ratio: true,
                fix_principal_point: true,
                zero_tangent_dist: true,
                fix_k1: true,
                fix_k2: true,
                fix_k3: true,
                ..CalibrationFlags::default()
            },
            CalibrationPhase::Bootstrap(BootstrapStrategy::PlanarFullScreen) => CalibrationFlags {
                use_intrinsic_guess: true,
                fix_principal_point: true,
                fix_focal_length: true,
                ..CalibrationFlags::default()
            },
            CalibrationPhase::Active => CalibrationFlags::all_free(),
        }
    }
}

/// Calibrator tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorParams {
    /// Translations are divided by this before the pose variance is taken.
    pub translation_scale: f64,
    /// Focal length of the initial guess, in pixels.
    pub initial_focal: f64,
}

impl Default for CalibratorParams {
    fn default() -> Self {
        Self {
            translation_scale: 10.0,
            initial_focal: 1000.0,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibratorError {
    #[error("insufficient data: no keyframes")]
    NoKeyframes,
    #[error("insufficient data: {total} points (need more than 4)")]
    InsufficientPoints { total: usize },
    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl CalibratorError {
    /// The calibration was not attempted for lack of data; callers treat
    /// this as "not ready yet".
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            CalibratorError::NoKeyframes
                | CalibratorError::InsufficientPoints { .. }
                | CalibratorError::Solver(SolverError::NoViews)
                | CalibratorError::Solver(SolverError::InsufficientPoints { .. })
        )
    }
}

/// Latest intrinsic estimate with its uncertainty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntrinsicsEstimate {
    /// `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`; NaN before the first success.
    pub values: [f64; INTRINSIC_COUNT],
    /// Per-parameter variance (solver std-dev squared).
    pub variance: [f64; INTRINSIC_COUNT],
    /// `variance / max(|value|, 1)`.
    pub dispersion: [f64; INTRINSIC_COUNT],
}

impl IntrinsicsEstimate {
    pub fn unset() -> Self {
        Self {
            values: [f64::NAN; INTRINSIC_COUNT],
            variance: [f64::NAN; INTRINSIC_COUNT],
            dispersion: [f64::NAN; INTRINSIC_COUNT],
        }
    }

    pub fn is_set(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Camera model for a set estimate.
    pub fn camera(&self) -> Option<PinholeCamera> {
        self.is_set()
            .then(|| PinholeCamera::from_params(&self.values))
    }

    /// Sum of all parameter variances.
    pub fn total_variance(&self) -> f64 {
        self.variance.iter().sum()
    }

    /// How much the total variance grew since `previous`, if it did.
    pub fn variance_increase_from(&self, previous: &IntrinsicsEstimate) -> Option<f64> {
        let (before, after) = (previous.total_variance(), self.total_variance());
        (before.is_finite() && after.is_finite() && after > before).then(|| after - before)
    }
}

/// Variance of the keyframe poses: rotations as Euler angles in degrees,
/// translations divided by the configured scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseVariance {
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
}

impl PoseVariance {
    pub fn from_poses(poses: &[Pose], translation_scale: f64) -> Self {
        let mut cols: [Vec<f64>; 6] = Default::default();
        for pose in poses {
            let [roll, pitch, yaw] = pose.euler_degrees();
            cols[0].push((roll + 360.0) % 360.0);
            cols[1].push(pitch);
            cols[2].push(yaw);
            for k in 0..3 {
                cols[3 + k].push(pose.tvec[k] / translation_scale);
            }
        }
        let v = cols.map(|c| variance(&c));
        Self {
            rx: v[0],
            ry: v[1],
            rz: v[2],
            tx: v[3],
            ty: v[4],
            tz: v[5],
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [self.rx, self.ry, self.rz, self.tx, self.ty, self.tz]
    }
}

/// Result of one calibration round.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSnapshot {
    pub estimate: IntrinsicsEstimate,
    /// RMS reprojection error in pixels, NaN before the first success.
    pub reperr: f64,
    pub poses: Vec<Pose>,
    pub pose_variance: PoseVariance,
}

impl Default for CalibrationSnapshot {
    fn default() -> Self {
        Self {
            estimate: IntrinsicsEstimate::unset(),
            reperr: f64::NAN,
            poses: Vec::new(),
            pose_variance: PoseVariance::default(),
        }
    }
}

/// Owns the keyframe store and the current intrinsic estimate.
pub struct Calibrator<S = BundleCalibrator> {
    solver: S,
    params: CalibratorParams,
    image_size: ImageSize,
    initial_camera: PinholeCamera,
    keyframes: Vec<Keyframe>,
    current: CalibrationSnapshot,
}

impl Calibrator<BundleCalibrator> {
    pub fn new(image_size: ImageSize, params: CalibratorParams) -> Self {
        Self::with_solver(image_size, params, BundleCalibrator::default())
    }
}

impl<S: CalibrationSolver> Calibrator<S> {
    pub fn with_solver(image_size: ImageSize, params: CalibratorParams, solver: S) -> Self {
        let initial_camera = PinholeCamera::default_for_image(image_size, params.initial_focal);
        Self {
            solver,
            params,
            image_size,
            initial_camera,
            keyframes: Vec::new(),
            current: CalibrationSnapshot::default(),
        }
    }

    #[inline]
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    #[inline]
    pub fn params(&self) -> &CalibratorParams {
        &self.params
    }

    #[inline]
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn add_keyframe(&mut self, keyframe: Keyframe) {
        self.keyframes.push(keyframe);
    }

    #[inline]
    pub fn initial_camera(&self) -> &PinholeCamera {
        &self.initial_camera
    }

    #[inline]
    pub fn estimate(&self) -> &IntrinsicsEstimate {
        &self.current.estimate
    }

    /// RMS reprojection error of the last successful calibration.
    #[inline]
    pub fn reperr(&self) -> f64 {
        self.current.reperr
    }

    /// Keyframe poses of the last successful calibration.
    #[inline]
    pub fn poses(&self) -> &[Pose] {
        &self.current.poses
    }

    #[inline]
    pub fn pose_variance(&self) -> &PoseVariance {
        &self.current.pose_variance
    }

    /// Copy of the current result, for [`Calibrator::restore`].
    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.current.clone()
    }

    /// Roll the estimate back to an earlier result. Keyframes are untouched.
    pub fn restore(&mut self, snapshot: CalibrationSnapshot) {
        self.current = snapshot;
    }

    /// Current estimate, `None` before the first successful calibration.
    pub fn camera(&self) -> Option<PinholeCamera> {
        self.current.estimate.camera()
    }

    /// Current estimate, falling back to the default guess.
    pub fn camera_or_initial(&self) -> PinholeCamera {
        self.camera().unwrap_or(self.initial_camera)
    }

    /// Drop all keyframes and estimates.
    pub fn reset(&mut self) {
        self.keyframes.clear();
        self.current = CalibrationSnapshot::default();
    }

    /// Calibrate from `keyframes`, or from the stored keyframes when the
    /// slice is empty. Replaces the estimate and returns the dispersion index
    /// per intrinsic.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, keyframes), fields(views = tracing::field::Empty))
    )]
    pub fn calibrate(
        &mut self,
        keyframes: &[Keyframe],
        phase: CalibrationPhase,
    ) -> Result<[f64; INTRINSIC_COUNT], CalibratorError> {
        let views = if keyframes.is_empty() {
            &self.keyframes[..]
        } else {
            keyframes
        };
        #[cfg(feature = "tracing")]
        tracing::Span::current().record("views", views.len());

        if views.is_empty() {
            return Err(CalibratorError::NoKeyframes);
        }
        let total: usize = views.iter().map(Keyframe::len).sum();
        if total <= 4 {
            return Err(CalibratorError::InsufficientPoints { total });
        }

        let guess = match phase {
            CalibrationPhase::Bootstrap(BootstrapStrategy::PlanarFullScreen) => {
                self.camera_or_initial()
            }
            _ => self.initial_camera,
        };
        let out = self
            .solver
            .calibrate_camera(views, self.image_size, &phase.flags(), &guess)?;

        let values = out.camera.to_params();
        let variance = out.std_intrinsics.map(|s| s * s);
        let dispersion = index_of_dispersion_all(&values, &variance);
        let pose_variance = PoseVariance::from_poses(&out.poses, self.params.translation_scale);

        info!(
            "calibrated {} keyframes ({:?}): rms={:.3}px fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
            views.len(),
            phase,
            out.rms,
            values[0],
            values[1],
            values[2],
            values[3]
        );

        self.current = CalibrationSnapshot {
            estimate: IntrinsicsEstimate {
                values,
                variance,
                dispersion,
            },
            reperr: out.rms,
            poses: out.poses,
            pose_variance,
        };
        Ok(dispersion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn estimate_is_nan_before_calibration() {
        let calib = Calibrator::new(ImageSize::new(640, 480), CalibratorParams::default());
        assert!(calib.estimate().values.iter().all(|v| v.is_nan()));
        assert!(calib.camera().is_none());
        assert_eq!(calib.camera_or_initial().intrinsics.fx, 1000.0);
    }

    #[test]
    fn empty_store_is_insufficient_data() {
        let mut calib = Calibrator::new(ImageSize::new(640, 480), CalibratorParams::default());
        let err = calib.calibrate(&[], CalibrationPhase::Active).unwrap_err();
        assert_eq!(err, CalibratorError::NoKeyframes);
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn roll_is_wrapped_before_variance() {
        let poses = [
            Pose::new(Vector3::new(179.0_f64.to_radians(), 0.0, 0.0), Vector3::zeros()),
            Pose::new(Vector3::new(-179.0_f64.to_radians(), 0.0, 0.0), Vector3::zeros()),
        ];
        let var = PoseVariance::from_poses(&poses, 10.0);
        assert!((var.rx - 1.0).abs() < 1e-6, "rx var {}", var.rx);
    }

    #[test]
    fn translation_is_scaled() {
        let poses = [
            Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 100.0)),
            Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 120.0)),
        ];
        let var = PoseVariance::from_poses(&poses, 10.0);
        assert!((var.tz - 1.0).abs() < 1e-12);
    }

    #[test]
    fn total_variance_increase_is_reported() {
        let mut before = IntrinsicsEstimate::unset();
        before.variance = [1.0; INTRINSIC_COUNT];
        let mut after = before;
        after.variance[0] = 4.0;
        assert_eq!(after.variance_increase_from(&before), Some(3.0));
        assert_eq!(before.variance_increase_from(&after), None);
        assert_eq!(after.variance_increase_from(&IntrinsicsEstimate::unset()), None);
    }

    #[test]
    fn bootstrap_flags() {
        let orbital = CalibrationPhase::Bootstrap(BootstrapStrategy::Orbital).flags();
        assert!(orbital.fix_aspect_ratio && orbital.zero_tangent_dist && orbital.fix_k3);
        let planar = CalibrationPhase::Bootstrap(BootstrapStrategy::PlanarFullScreen).flags();
        assert!(planar.fix_principal_point && planar.fix_focal_length);
        assert_eq!(CalibrationPhase::Active.flags().free_count(), 9);
    }
}
