//! Closed-loop session against a synthetic camera.
//!
//! A virtual user moves the board toward each target pose, holds it there and
//! forces a capture when the guidance does not trigger on its own.

use crate::guidance::{GuidanceState, UserGuidance};
use crate::io::{CalibrationRecord, GuideIoError, SessionConfig};
use crate::posegen::orbital_pose;
use calib_guide_charuco::synthetic::{PixelNoise, SyntheticBoardDetector, SyntheticFrame};
use calib_guide_charuco::CharucoDetector;
use calib_guide_core::{Distortion, PinholeCamera, Pose};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Synthetic camera and virtual-user behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Ground-truth camera; derived from the image size when absent.
    pub true_camera: Option<PinholeCamera>,
    /// Focal length of the derived ground-truth camera.
    pub true_focal: f64,
    /// `k1` of the derived ground-truth camera.
    pub true_k1: f64,
    /// Uniform corner noise amplitude, pixels.
    pub noise_px: f64,
    pub seed: u64,
    pub max_frames: usize,
    /// Frames spent moving from one target to the next.
    pub approach_frames: usize,
    /// Frames at the target before the user forces a capture.
    pub force_after: usize,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            true_camera: None,
            true_focal: 900.0,
            true_k1: -0.05,
            noise_px: 0.2,
            seed: 7,
            max_frames: 2000,
            approach_frames: 10,
            force_after: 20,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] GuideIoError),
    #[error("no calibration after {frames} frames")]
    NotCalibrated { frames: usize },
}

/// Outcome of a simulated session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationReport {
    pub frames: usize,
    pub keyframes: usize,
    pub forced_captures: usize,
    pub state: GuidanceState,
    pub converged_params: Vec<String>,
    pub true_camera: PinholeCamera,
    pub record: CalibrationRecord,
    pub user_info: String,
}

impl SimulationReport {
    /// Relative focal error of the estimate.
    pub fn focal_error(&self) -> f64 {
        match self.record.camera() {
            Some(est) => {
                let t = &self.true_camera.intrinsics;
                let e = &est.intrinsics;
                ((e.fx - t.fx).abs() / t.fx).max((e.fy - t.fy).abs() / t.fy)
            }
            None => f64::INFINITY,
        }
    }
}

/// Virtual user: glides from its current pose to the target over
/// `approach_frames` frames, then holds still.
#[derive(Clone, Debug)]
struct VirtualUser {
    start: Pose,
    current: Pose,
    goal: Option<[f64; 6]>,
    frames_on_goal: usize,
    approach_frames: usize,
}

impl VirtualUser {
    fn new(start: Pose, approach_frames: usize) -> Self {
        Self {
            start,
            current: start,
            goal: None,
            frames_on_goal: 0,
            approach_frames: approach_frames.max(1),
        }
    }

    fn step(&mut self, target: &Pose) -> Pose {
        let key = target.to_array();
        if self.goal != Some(key) {
            self.goal = Some(key);
            self.start = self.current;
            self.frames_on_goal = 0;
        }
        self.frames_on_goal += 1;
        let t = (self.frames_on_goal as f64 / self.approach_frames as f64).min(1.0);
        self.current = self.start.interpolate(target, t);
        self.current
    }

    /// Frames spent holding the current goal.
    fn holding(&self) -> usize {
        self.frames_on_goal.saturating_sub(self.approach_frames)
    }
}

fn ground_truth(config: &SessionConfig) -> PinholeCamera {
    let sim = &config.simulation;
    sim.true_camera.unwrap_or_else(|| {
        let mut cam = PinholeCamera::default_for_image(config.image_size, sim.true_focal);
        cam.distortion = Distortion {
            k1: sim.true_k1,
            ..Distortion::ZERO
        };
        cam
    })
}

/// Run a full guided session against the synthetic camera described by
/// `config`.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn run_simulation(config: &SessionConfig) -> Result<SimulationReport, SimulationError> {
    let sim = &config.simulation;
    let board = config.build_board()?;
    let truth = ground_truth(config);

    let backend = SyntheticBoardDetector::new(
        board.clone(),
        truth,
        config.image_size,
        PixelNoise {
            seed: sim.seed,
            max_abs_px: sim.noise_px,
        },
    );
    let mut detector = CharucoDetector::new(board.clone(), config.detector.clone(), backend);
    let mut guidance = UserGuidance::new(
        &board,
        config.image_size,
        config.guidance.clone(),
        config.calibrator.clone(),
        config.pose_generator.clone(),
    );

    // the board is shown tilted and well inside the view until a target exists
    let units = board.board_units();
    let home = orbital_pose(&units, 0.0, PI / 6.0, 0.0, 2.0);
    let mut user = VirtualUser::new(home, sim.approach_frames);

    let mut frames = 0;
    let mut forced_captures = 0;
    while frames < sim.max_frames && !guidance.converged() {
        frames += 1;
        let target = guidance.target_pose().copied().unwrap_or(home);
        let pose = user.step(&target);
        detector.detect(&SyntheticFrame::new(pose));

        let force = user.holding() > sim.force_after;
        if guidance.update(&mut detector, force) {
            if force {
                forced_captures += 1;
            }
            debug!(
                "frame {frames}: keyframe {} captured{}",
                guidance.calibrator().keyframes().len(),
                if force { " (forced)" } else { "" }
            );
        }
    }

    let calib = guidance.calibrator();
    let record = CalibrationRecord::from_calibrator(calib, &config.board)
        .map_err(|_| SimulationError::NotCalibrated { frames })?;
    info!(
        "simulation finished after {frames} frames: {} keyframes, state {:?}, rms {:.3}",
        calib.keyframes().len(),
        guidance.state(),
        calib.reperr()
    );

    Ok(SimulationReport {
        frames,
        keyframes: calib.keyframes().len(),
        forced_captures,
        state: guidance.state(),
        converged_params: guidance
            .convergence()
            .converged()
            .iter()
            .map(|p| p.name().to_string())
            .collect(),
        true_camera: truth,
        record,
        user_info: guidance.user_info().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn user_reaches_the_target_and_holds() {
        let start = Pose::new(Vector3::new(PI, 0.0, 0.0), Vector3::new(0.0, 0.0, 500.0));
        let goal = Pose::new(Vector3::new(PI, 0.0, 0.0), Vector3::new(50.0, 0.0, 400.0));
        let mut user = VirtualUser::new(start, 4);
        let mut last = start;
        for _ in 0..4 {
            last = user.step(&goal);
        }
        assert!((last.tvec - goal.tvec).norm() < 1e-9);
        assert_eq!(user.holding(), 0);
        user.step(&goal);
        user.step(&goal);
        assert_eq!(user.holding(), 2);
    }

    #[test]
    fn derived_ground_truth_uses_the_image_center() {
        let config = SessionConfig::default();
        let cam = ground_truth(&config);
        assert_eq!(cam.intrinsics.cx, 639.5);
        assert_eq!(cam.intrinsics.fx, 900.0);
        assert_eq!(cam.distortion.k1, -0.05);
    }
}
