//! Frame-level ChArUco detection.
//!
//! This module wraps a corner-detection backend with PnP pose estimation and
//! inter-frame corner flow, producing one [`FrameDetection`] per frame.

mod error;
mod params;
mod pipeline;
mod result;

pub use error::CharucoDetectError;
pub use params::CharucoDetectorParams;
pub use pipeline::{BoardDetector, CharucoDetector};
pub use result::{FrameDetection, RawBoardDetection};
