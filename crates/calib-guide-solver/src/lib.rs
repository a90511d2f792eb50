//! Numeric back-end for guided calibration.
//!
//! - [`BundleCalibrator`]: planar-target camera calibration (homography
//!   initialization + joint Levenberg–Marquardt refinement) honouring
//!   [`CalibrationFlags`], with per-parameter standard deviations.
//! - [`PlanarPnp`]: pose of a planar target from 2D-3D correspondences.
//! - [`backend`]: adapter from residual models to the `levenberg-marquardt`
//!   crate, shared by both.
//!
//! Both solvers sit behind traits ([`CalibrationSolver`], [`PoseSolver`]) so
//! callers can substitute another implementation.

pub mod backend;
mod calibrate;
mod error;
mod flags;
mod init;
mod pnp;

pub use calibrate::{BundleCalibrator, CalibrationOutput, CalibrationSolver};
pub use error::{PnpError, SolverError};
pub use flags::CalibrationFlags;
pub use init::{init_focal_lengths, planar_pose, pose_from_normalized_homography};
pub use backend::{NllsProblem, SolveOptions, SolveReport};
pub use pnp::{PlanarPnp, PoseSolver};
