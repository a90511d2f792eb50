use calib_guide_core::Pose;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Output of a board-detection backend for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBoardDetection {
    /// ChArUco corner positions in pixels.
    pub corners: Vec<Point2<f64>>,
    /// ChArUco corner ids, parallel to `corners`.
    pub ids: Vec<u32>,
    pub marker_ids: Vec<u32>,
    /// Marker corners (TL, TR, BR, BL), parallel to `marker_ids`.
    pub marker_corners: Vec<[Point2<f64>; 4]>,
}

/// Per-frame detection state handed to the guidance loop.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDetection {
    pub corners: Vec<Point2<f64>>,
    pub ids: Vec<u32>,
    /// Board pose, set only when intrinsics are known, enough corners were
    /// seen and PnP succeeded.
    pub pose: Option<Pose>,
    /// Mean corner displacement against the previous frame when the same
    /// corner-id set was seen, `+inf` otherwise.
    pub mean_flow: f64,
}

impl FrameDetection {
    /// A frame without any detected corners.
    pub fn empty() -> Self {
        Self {
            corners: Vec::new(),
            ids: Vec::new(),
            pose: None,
            mean_flow: f64::INFINITY,
        }
    }

    #[inline]
    pub fn n_pts(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn pose_valid(&self) -> bool {
        self.pose.is_some()
    }
}

impl Default for FrameDetection {
    fn default() -> Self {
        Self::empty()
    }
}
