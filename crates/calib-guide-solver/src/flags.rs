use calib_guide_core::INTRINSIC_COUNT;
use serde::{Deserialize, Serialize};

/// Which intrinsic parameters the calibration solver keeps fixed.
///
/// Parameter indices follow `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Start from the provided camera instead of a homography-based init.
    pub use_intrinsic_guess: bool,
    /// Keep `fx / fy` at the ratio of the guess.
    pub fix_aspect_ratio: bool,
    pub fix_principal_point: bool,
    pub fix_focal_length: bool,
    /// Force `p1 = p2 = 0`.
    pub zero_tangent_dist: bool,
    pub fix_k1: bool,
    pub fix_k2: bool,
    pub fix_k3: bool,
}

impl CalibrationFlags {
    /// Every parameter free, homography initialization.
    pub fn all_free() -> Self {
        Self::default()
    }

    /// Per-parameter "free" mask. `fx` is not free under a fixed aspect
    /// ratio; it is derived from `fy` instead.
    pub fn free_mask(&self) -> [bool; INTRINSIC_COUNT] {
        [
            !(self.fix_focal_length || self.fix_aspect_ratio),
            !self.fix_focal_length,
            !self.fix_principal_point,
            !self.fix_principal_point,
            !self.fix_k1,
            !self.fix_k2,
            !self.zero_tangent_dist,
            !self.zero_tangent_dist,
            !self.fix_k3,
        ]
    }

    pub fn free_count(&self) -> usize {
        self.free_mask().iter().filter(|&&f| f).count()
    }
}
