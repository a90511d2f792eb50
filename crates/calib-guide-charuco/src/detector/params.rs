use serde::{Deserialize, Serialize};

/// Configuration for the frame-level ChArUco detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharucoDetectorParams {
    /// Minimal number of ChArUco corners for a pose estimate.
    pub min_corners: usize,
    /// Minimal number of decoded markers to accept a detection.
    pub min_markers: usize,
}

impl Default for CharucoDetectorParams {
    fn default() -> Self {
        Self {
            min_corners: calib_guide_core::MIN_CORNERS,
            min_markers: 1,
        }
    }
}
