//! ChArUco board model and frame-level detection for guided calibration.
//!
//! - [`CharucoBoard`]: validated board layout, corner ids, object points and
//!   a raster rendering for previews.
//! - [`CharucoDetector`]: wraps any [`BoardDetector`] backend, estimates the
//!   board pose once intrinsics are known and tracks inter-frame corner flow.
//! - [`synthetic`]: image-free backends for simulation and tests.

mod board;
mod detector;
pub mod synthetic;

pub use board::{CharucoBoard, CharucoBoardError, CharucoBoardSpec, MarkerLayout, PointMatchError};
pub use detector::{
    BoardDetector, CharucoDetectError, CharucoDetector, CharucoDetectorParams, FrameDetection,
    RawBoardDetection,
};
