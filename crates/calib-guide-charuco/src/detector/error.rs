use crate::board::PointMatchError;

/// Errors raised while turning a backend detection into board points.
///
/// [`CharucoDetector::detect`](super::CharucoDetector::detect) logs these and
/// treats the frame as empty; they only surface from backends and
/// [`CharucoDetector::get_calib_pts`](super::CharucoDetector::get_calib_pts).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CharucoDetectError {
    #[error("board not detected")]
    BoardNotDetected,
    #[error("too few markers ({found} < {required})")]
    TooFewMarkers { found: usize, required: usize },
    #[error(transparent)]
    Inconsistent(#[from] PointMatchError),
    #[error(transparent)]
    Keyframe(#[from] calib_guide_core::KeyframeError),
    #[error("board detector backend failed: {0}")]
    Backend(String),
}
