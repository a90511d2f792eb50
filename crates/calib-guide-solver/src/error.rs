/// Errors returned by the calibration solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("no views to calibrate from")]
    NoViews,
    #[error("not enough points for calibration (total={total})")]
    InsufficientPoints { total: usize },
    #[error("view {view} is not a planar target (object points need z = 0)")]
    NonPlanarTarget { view: usize },
    #[error("view {view} is degenerate (homography or pose init failed)")]
    DegenerateView { view: usize },
    #[error("optimization diverged")]
    Diverged,
}

/// Errors returned by the PnP solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PnpError {
    #[error("object/image point count mismatch ({object} vs {image})")]
    LengthMismatch { object: usize, image: usize },
    #[error("PnP needs at least 4 points, got {count}")]
    InsufficientPoints { count: usize },
    #[error("object points are not planar")]
    NonPlanarTarget,
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("target lies behind the camera")]
    BehindCamera,
    #[error("reprojection error too large (rms={rms:.2}px, max={max:.2}px)")]
    ExcessiveError { rms: f64, max: f64 },
}
