//! Frame-synchronous guidance loop: decides when to capture a keyframe,
//! drives the calibrator and proposes the next target pose.

use crate::calibrator::{
    BootstrapStrategy, CalibrationPhase, Calibrator, CalibratorError, CalibratorParams,
};
use crate::convergence::{ConvergenceFlags, IntrinsicParam};
use crate::posegen::{PoseGenerator, PoseGeneratorDist, PoseGeneratorParams};
use crate::preview::{jaccard_similarity, BoardPreview};
use calib_guide_charuco::{BoardDetector, CharucoBoard, CharucoDetector, FrameDetection};
use calib_guide_core::{argmax, argmin, GrayImage, ImageSize, Pose, INTRINSIC_COUNT};
use calib_guide_solver::{BundleCalibrator, CalibrationSolver, PoseSolver};
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Guidance thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceParams {
    /// A parameter converges when one capture shrinks its std-dev by less
    /// than this fraction.
    pub var_terminate: f64,
    /// Silhouette overlap needed to count the target pose as reached.
    pub min_similarity: f64,
    /// Mean corner flow (px/frame) below which the camera is still.
    pub still_flow_threshold: f64,
    /// Corners needed for a capture while fewer than two keyframes exist.
    pub min_pts_initial: usize,
    /// Corners needed for a capture afterwards.
    pub min_pts_active: usize,
    pub preview_px_per_square: usize,
    pub preview_width: usize,
}

impl Default for GuidanceParams {
    fn default() -> Self {
        Self {
            var_terminate: 0.1,
            min_similarity: 0.85,
            still_flow_threshold: 2.0,
            min_pts_initial: 27,
            min_pts_active: 15,
            preview_px_per_square: 12,
            preview_width: 640,
        }
    }
}

/// Coarse session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceState {
    Initializing,
    ActiveGuidance,
    Converged,
}

#[derive(Clone, Debug)]
struct TargetPose {
    pose: Pose,
    silhouette: GrayImage,
}

/// Guided calibration session.
pub struct UserGuidance<S = BundleCalibrator, G = PoseGeneratorDist> {
    params: GuidanceParams,
    calib: Calibrator<S>,
    posegen: G,
    preview: BoardPreview,
    board_units: Vector3<f64>,
    all_pts: usize,
    convergence: ConvergenceFlags,
    tgt_param: Option<IntrinsicParam>,
    target: Option<TargetPose>,
    converged: bool,
    prev_variance: [f64; INTRINSIC_COUNT],
    last_phase: Option<CalibrationPhase>,
    best_bootstrap_err: f64,
    pose_reached: bool,
    still: bool,
    user_info: String,
}

impl UserGuidance<BundleCalibrator, PoseGeneratorDist> {
    pub fn new(
        board: &CharucoBoard,
        image_size: ImageSize,
        params: GuidanceParams,
        calibrator: CalibratorParams,
        posegen: PoseGeneratorParams,
    ) -> Self {
        Self::with_parts(
            board,
            params,
            Calibrator::new(image_size, calibrator),
            PoseGeneratorDist::new(image_size, posegen),
        )
    }
}

impl<S: CalibrationSolver, G: PoseGenerator> UserGuidance<S, G> {
    /// Assemble a session from a calibrator and pose generator.
    pub fn with_parts(
        board: &CharucoBoard,
        params: GuidanceParams,
        calib: Calibrator<S>,
        posegen: G,
    ) -> Self {
        let mut preview = BoardPreview::new(
            board,
            calib.image_size(),
            params.preview_px_per_square,
            params.preview_width,
        );
        preview.create_maps(calib.initial_camera());
        Self {
            params,
            calib,
            posegen,
            preview,
            board_units: board.board_units(),
            all_pts: board.corner_count(),
            convergence: ConvergenceFlags::new(),
            tgt_param: None,
            target: None,
            converged: false,
            prev_variance: [f64::NAN; INTRINSIC_COUNT],
            last_phase: None,
            best_bootstrap_err: f64::INFINITY,
            pose_reached: false,
            still: false,
            user_info: String::from("initialization"),
        }
    }

    #[inline]
    pub fn params(&self) -> &GuidanceParams {
        &self.params
    }

    #[inline]
    pub fn calibrator(&self) -> &Calibrator<S> {
        &self.calib
    }

    #[inline]
    pub fn pose_generator(&self) -> &G {
        &self.posegen
    }

    #[inline]
    pub fn preview(&self) -> &BoardPreview {
        &self.preview
    }

    #[inline]
    pub fn convergence(&self) -> &ConvergenceFlags {
        &self.convergence
    }

    /// Parameter the current target pose is meant to improve.
    #[inline]
    pub fn tgt_param(&self) -> Option<IntrinsicParam> {
        self.tgt_param
    }

    #[inline]
    pub fn converged(&self) -> bool {
        self.converged
    }

    #[inline]
    pub fn user_info(&self) -> &str {
        &self.user_info
    }

    /// Whether the last frame matched the target (or was forced).
    #[inline]
    pub fn pose_reached(&self) -> bool {
        self.pose_reached
    }

    #[inline]
    pub fn still(&self) -> bool {
        self.still
    }

    pub fn state(&self) -> GuidanceState {
        if self.converged {
            GuidanceState::Converged
        } else if self.calib.keyframes().len() < 2 {
            GuidanceState::Initializing
        } else {
            GuidanceState::ActiveGuidance
        }
    }

    pub fn target_pose(&self) -> Option<&Pose> {
        self.target.as_ref().map(|t| &t.pose)
    }

    /// Board overlay for the target pose at the image resolution.
    pub fn target_overlay(&self) -> Option<GrayImage> {
        self.target.as_ref().map(|t| self.preview.project(&t.pose))
    }

    /// Overlap of the target silhouette with the board under `live`.
    pub fn pose_close_to_tgt(&self, live: Option<&Pose>) -> f64 {
        match (&self.target, live) {
            (Some(target), Some(live)) => {
                jaccard_similarity(&target.silhouette, &self.preview.silhouette(live))
            }
            _ => 0.0,
        }
    }

    /// Start a new session: drop keyframes, estimates and convergence.
    pub fn reset(&mut self) {
        self.calib.reset();
        self.posegen.reset();
        self.preview.create_maps(&self.calib.camera_or_initial());
        self.convergence.reset();
        self.tgt_param = None;
        self.target = None;
        self.converged = false;
        self.prev_variance = [f64::NAN; INTRINSIC_COUNT];
        self.last_phase = None;
        self.best_bootstrap_err = f64::INFINITY;
        self.pose_reached = false;
        self.still = false;
        self.user_info = String::from("initialization");
    }

    /// Process the detector's latest frame. Returns `true` when a keyframe
    /// was captured.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(force = force)))]
    pub fn update<D, P>(&mut self, detector: &mut CharucoDetector<D, P>, force: bool) -> bool
    where
        D: BoardDetector,
        P: PoseSolver,
    {
        let det = detector.last().clone();
        let n_pts = det.n_pts();

        if self.calib.keyframes().is_empty() && 2 * n_pts >= self.all_pts {
            self.bootstrap(detector);
        }

        let similarity = self.pose_close_to_tgt(det.pose.as_ref());
        self.pose_reached = (force && n_pts >= detector.params().min_corners)
            || similarity > self.params.min_similarity;
        self.still = det.mean_flow < self.params.still_flow_threshold;

        let required = if self.calib.keyframes().len() < 2 {
            self.params.min_pts_initial
        } else {
            self.params.min_pts_active
        };
        let capture = !self.converged
            && self.pose_reached
            && n_pts >= required
            && (self.still || force);

        let captured = capture && self.capture(detector);
        self.refresh_user_info(&det);
        captured
    }

    fn bootstrap<D: BoardDetector, P: PoseSolver>(&mut self, detector: &mut CharucoDetector<D, P>) {
        let keyframe = match detector.get_calib_pts() {
            Ok(kf) => kf,
            Err(err) => {
                debug!("bootstrap skipped: {err}");
                return;
            }
        };
        let previous = self.calib.snapshot();
        let phase = CalibrationPhase::Bootstrap(BootstrapStrategy::Orbital);
        match self.calib.calibrate(std::slice::from_ref(&keyframe), phase) {
            Ok(_) => {}
            Err(err) => {
                log_calibration_error(&err);
                return;
            }
        }
        let reperr = self.calib.reperr();
        match self.calib.camera() {
            Some(camera) if reperr < self.best_bootstrap_err => {
                info!("bootstrap accepted: fx={:.1} rms={reperr:.3}", camera.intrinsics.fx);
                self.best_bootstrap_err = reperr;
                self.preview.create_maps(&camera);
                detector.set_intrinsics(camera);
                self.set_next_pose();
            }
            _ => {
                debug!("bootstrap rejected: rms={reperr:.3}");
                self.calib.restore(previous);
            }
        }
    }

    fn capture<D: BoardDetector, P: PoseSolver>(
        &mut self,
        detector: &mut CharucoDetector<D, P>,
    ) -> bool {
        let keyframe = match detector.get_calib_pts() {
            Ok(kf) => kf,
            Err(err) => {
                warn!("capture failed: {err}");
                return false;
            }
        };
        self.calib.add_keyframe(keyframe);
        let nk = self.calib.keyframes().len();
        info!("captured keyframe {nk}");

        // the keyframe was taken at the target generated with nk - 1 keyframes
        let phase = self.posegen.phase(nk - 1);
        let before = *self.calib.estimate();
        if let Err(err) = self.calib.calibrate(&[], phase) {
            log_calibration_error(&err);
            return true;
        }
        if let Some(camera) = self.calib.camera() {
            self.preview.create_maps(&camera);
            detector.set_intrinsics(camera);
        }

        // variances are only comparable between two joint calibrations
        let comparable =
            phase == CalibrationPhase::Active && self.last_phase == Some(CalibrationPhase::Active);
        if comparable {
            if let Some(increase) = self.calib.estimate().variance_increase_from(&before) {
                info!(
                    "total intrinsic variance increased by {increase:.3e} ({:.3e} -> {:.3e})",
                    before.total_variance(),
                    self.calib.estimate().total_variance()
                );
            }
            self.update_convergence();
        }
        self.last_phase = Some(phase);
        self.prev_variance = self.calib.estimate().variance;
        self.tgt_param = self.next_target_param();

        if self.convergence.all() {
            self.converged = true;
            self.target = None;
            info!("all parameters converged, rms={:.3}", self.calib.reperr());
        } else {
            self.set_next_pose();
        }
        true
    }

    fn update_convergence(&mut self) {
        let Some(tgt) = self.tgt_param else {
            return;
        };
        let variance = self.calib.estimate().variance;
        for &param in tgt.group() {
            let i = param.index();
            let rel = 1.0 - variance[i].sqrt() / self.prev_variance[i].sqrt();
            if rel < 0.0 {
                debug!(
                    "{param}: variance increased ({:.3e} -> {:.3e})",
                    self.prev_variance[i], variance[i]
                );
            }
            if rel > 0.0 && rel < self.params.var_terminate && self.convergence.mark(param) {
                info!("{param} converged (std reduced by {:.1}%)", rel * 100.0);
            }
        }
    }

    fn next_target_param(&self) -> Option<IntrinsicParam> {
        let mut dispersion = self.calib.estimate().dispersion;
        for param in self.convergence.converged() {
            dispersion[param.index()] = 0.0;
        }
        argmax(&dispersion).and_then(IntrinsicParam::from_index)
    }

    fn set_next_pose(&mut self) {
        let nk = self.calib.keyframes().len();
        let camera = self.calib.camera_or_initial();
        let tgt = self.tgt_param.unwrap_or(IntrinsicParam::Fx);
        let pose = self.posegen.get_pose(&self.board_units, nk, tgt, &camera);
        debug!("next target for {tgt} at nk={nk}: {:?}", pose.to_array());
        let silhouette = self.preview.silhouette(&pose);
        self.target = Some(TargetPose { pose, silhouette });
    }

    fn refresh_user_info(&mut self, det: &FrameDetection) {
        let mut text = if self.converged {
            format!("converged at MSE: {:.3}", self.calib.reperr())
        } else if self.calib.keyframes().len() < 2 {
            String::from("initialization")
        } else {
            self.direction_hint()
        };
        if self.converged {
            self.user_info = text;
            return;
        }
        if self.pose_reached && !self.still {
            text.push_str("\nhold camera steady");
        }
        if !det.pose_valid() {
            text.push_str("\nmoving or bad aim");
        }
        self.user_info = text;
    }

    fn direction_hint(&self) -> String {
        let tgt = self.tgt_param.unwrap_or(IntrinsicParam::Fx);
        let var = self.calib.pose_variance().as_array();
        if tgt.index() < 2 {
            let axis = if argmin(&var[0..2]) == Some(1) { "y" } else { "x" };
            format!("rotate '{axis}' to minimize '{tgt}'")
        } else {
            let axis = match argmin(&var[3..6]) {
                Some(2) => "'z' (distance)",
                Some(1) => "'y'",
                _ => "'x'",
            };
            format!("translate {axis} to minimize '{tgt}'")
        }
    }
}

fn log_calibration_error(err: &CalibratorError) {
    if err.is_insufficient_data() {
        debug!("calibration not ready: {err}");
    } else {
        info!("calibration failed: {err}");
    }
}
