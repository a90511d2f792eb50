//! Interactive ChArUco camera-calibration guidance.
//!
//! This crate provides:
//! - [`Calibrator`]: keyframe store and incremental intrinsic estimation with
//!   per-parameter uncertainty and pose variance,
//! - [`UserGuidance`]: the frame-synchronous loop that decides when to
//!   capture, tracks convergence and proposes the next target pose,
//! - [`PoseGeneratorDist`] and [`BoardPreview`]: target poses and their
//!   board overlays and silhouettes,
//! - JSON session config / calibration record I/O and a closed-loop
//!   simulation against a synthetic camera.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_guide::charuco::synthetic::{PixelNoise, SyntheticBoardDetector, SyntheticFrame};
//! use calib_guide::charuco::{CharucoBoard, CharucoBoardSpec, CharucoDetector};
//! use calib_guide::core::{ImageSize, PinholeCamera};
//! use calib_guide::UserGuidance;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let size = ImageSize::new(1280, 720);
//! let board = CharucoBoard::new(CharucoBoardSpec::default())?;
//! let backend = SyntheticBoardDetector::new(
//!     board.clone(),
//!     PinholeCamera::default_for_image(size, 900.0),
//!     size,
//!     PixelNoise::default(),
//! );
//! let mut detector = CharucoDetector::new(board.clone(), Default::default(), backend);
//! let mut guidance = UserGuidance::new(
//!     &board,
//!     size,
//!     Default::default(),
//!     Default::default(),
//!     Default::default(),
//! );
//!
//! if let Some(pose) = guidance.target_pose().copied() {
//!     detector.detect(&SyntheticFrame::new(pose));
//!     let captured = guidance.update(&mut detector, false);
//!     println!("{captured}: {}", guidance.user_info());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `calib_guide::core`: images, homographies, camera model, poses, keyframes.
//! - `calib_guide::solver`: Levenberg–Marquardt, camera calibration, PnP.
//! - `calib_guide::charuco`: board model, detector wrapper, synthetic backends.

pub use calib_guide_charuco as charuco;
pub use calib_guide_core as core;
pub use calib_guide_solver as solver;

mod calibrator;
mod convergence;
pub mod distortion;
mod guidance;
pub mod io;
mod posegen;
mod preview;
pub mod simulate;

pub use calibrator::{
    BootstrapStrategy, CalibrationPhase, CalibrationSnapshot, Calibrator, CalibratorError,
    CalibratorParams, IntrinsicsEstimate, PoseVariance,
};
pub use convergence::{ConvergenceFlags, IntrinsicParam, PARAM_GROUPS};
pub use guidance::{GuidanceParams, GuidanceState, UserGuidance};
pub use posegen::{
    board_center_in_camera, orbital_pose, pose_from_bounds, pose_planar_fullscreen,
    BinarySubdivision, PoseGenerator, PoseGeneratorDist, PoseGeneratorParams,
};
pub use preview::{jaccard_similarity, BoardPreview};
