//! Detector backends that do not need images: a synthetic camera that
//! projects the board through a ground-truth model, and a pass-through for
//! recorded or scripted detections.

use crate::{BoardDetector, CharucoBoard, CharucoDetectError, RawBoardDetection};
use calib_guide_core::{ImageSize, PinholeCamera, Pose};
use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Deterministic uniform pixel noise in `[-max_abs_px, +max_abs_px]`.
///
/// Samples depend only on `(seed, frame, corner)`, so sequences are stable
/// across platforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelNoise {
    pub seed: u64,
    pub max_abs_px: f64,
}

impl PixelNoise {
    #[inline]
    pub fn sample(&self, frame: usize, corner: u32) -> Vector2<f64> {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vector2::zeros();
        }
        let key = self.seed
            ^ (frame as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (corner as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        let u = unit_f64(splitmix64(key));
        let v = unit_f64(splitmix64(key ^ 0x94D0_49BB_1331_11EB));
        Vector2::new((u - 0.5) * 2.0 * max_abs, (v - 0.5) * 2.0 * max_abs)
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn unit_f64(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Camera state for one synthetic frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SyntheticFrame {
    /// Board-to-camera pose, `None` when the board is out of view.
    pub board_pose: Option<Pose>,
    /// Keep at most this many corners (lowest ids first), to mimic occlusion.
    pub max_corners: Option<usize>,
}

impl SyntheticFrame {
    pub fn new(board_pose: Pose) -> Self {
        Self {
            board_pose: Some(board_pose),
            max_corners: None,
        }
    }
}

/// Projects board corners through a ground-truth camera.
///
/// A corner is detected when it lies in front of the camera and at least
/// `margin_px` inside the image. Noise is resampled every frame.
#[derive(Clone, Debug)]
pub struct SyntheticBoardDetector {
    board: CharucoBoard,
    camera: PinholeCamera,
    image_size: ImageSize,
    noise: PixelNoise,
    margin_px: f64,
    frame_index: usize,
}

impl SyntheticBoardDetector {
    pub fn new(
        board: CharucoBoard,
        camera: PinholeCamera,
        image_size: ImageSize,
        noise: PixelNoise,
    ) -> Self {
        Self {
            board,
            camera,
            image_size,
            noise,
            margin_px: 2.0,
            frame_index: 0,
        }
    }

    pub fn with_margin(mut self, margin_px: f64) -> Self {
        self.margin_px = margin_px;
        self
    }

    /// Ground-truth camera.
    #[inline]
    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    /// Number of frames processed so far.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frame_index
    }

    fn visible(&self, p: &Point2<f64>) -> bool {
        let [w, h] = self.image_size.as_f64();
        p.x >= self.margin_px
            && p.y >= self.margin_px
            && p.x <= w - 1.0 - self.margin_px
            && p.y <= h - 1.0 - self.margin_px
    }

    /// Marker ids whose four corners are all visible.
    fn visible_markers(&self, pose: &Pose) -> (Vec<u32>, Vec<[Point2<f64>; 4]>) {
        let spec = self.board.spec();
        let side = self.board.marker_size();
        let inset = (spec.cell_size - side) * 0.5;
        let mut ids = Vec::new();
        let mut quads = Vec::new();
        for id in 0..self.board.marker_count() as u32 {
            let Some([sx, sy]) = self.board.marker_position(id) else {
                continue;
            };
            let x0 = sx as f64 * spec.cell_size + inset;
            let y0 = sy as f64 * spec.cell_size + inset;
            let corners = [(x0, y0), (x0 + side, y0), (x0 + side, y0 + side), (x0, y0 + side)]
                .map(|(x, y)| self.camera.project(pose, &Point3::new(x, y, 0.0)));
            if corners.iter().all(|c| c.is_some_and(|p| self.visible(&p))) {
                ids.push(id);
                quads.push(corners.map(|c| c.unwrap_or_else(Point2::origin)));
            }
        }
        (ids, quads)
    }
}

impl BoardDetector for SyntheticBoardDetector {
    type Frame = SyntheticFrame;

    fn detect_board(
        &mut self,
        frame: &SyntheticFrame,
    ) -> Result<RawBoardDetection, CharucoDetectError> {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let pose = frame.board_pose.ok_or(CharucoDetectError::BoardNotDetected)?;
        if !pose.is_finite() {
            return Err(CharucoDetectError::BoardNotDetected);
        }

        let (marker_ids, marker_corners) = self.visible_markers(&pose);
        let limit = frame.max_corners.unwrap_or(usize::MAX);

        let mut corners = Vec::new();
        let mut ids = Vec::new();
        for id in 0..self.board.corner_count() as u32 {
            if ids.len() >= limit {
                break;
            }
            let Some(obj) = self.board.object_point(id) else {
                continue;
            };
            let Some(p) = self.camera.project(&pose, &obj) else {
                continue;
            };
            if !self.visible(&p) {
                continue;
            }
            corners.push(p + self.noise.sample(frame_index, id));
            ids.push(id);
        }

        if ids.is_empty() {
            return Err(CharucoDetectError::BoardNotDetected);
        }
        Ok(RawBoardDetection {
            corners,
            ids,
            marker_ids,
            marker_corners,
        })
    }
}

/// Returns the detection it is given; an empty detection means "no board".
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDetector;

impl BoardDetector for PassthroughDetector {
    type Frame = RawBoardDetection;

    fn detect_board(
        &mut self,
        frame: &RawBoardDetection,
    ) -> Result<RawBoardDetection, CharucoDetectError> {
        if frame.ids.is_empty() && frame.corners.is_empty() {
            return Err(CharucoDetectError::BoardNotDetected);
        }
        Ok(frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CharucoBoardSpec;
    use calib_guide_core::{Distortion, Intrinsics};
    use nalgebra::Vector3;

    #[test]
    fn noise_is_bounded_and_deterministic() {
        let noise = PixelNoise {
            seed: 7,
            max_abs_px: 0.5,
        };
        for k in 0..100 {
            let s = noise.sample(3, k);
            assert!(s.x.abs() <= 0.5 && s.y.abs() <= 0.5);
            assert_eq!(s, noise.sample(3, k));
        }
        assert_ne!(noise.sample(0, 1), noise.sample(1, 1));
    }

    #[test]
    fn frontal_board_is_fully_detected() {
        let board = CharucoBoard::new(CharucoBoardSpec::default()).expect("board");
        let camera = PinholeCamera::new(
            Intrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 240.0,
            },
            Distortion::ZERO,
        );
        let mut det = SyntheticBoardDetector::new(
            board.clone(),
            camera,
            ImageSize::new(640, 480),
            PixelNoise::default(),
        );
        let pose = Pose::new(Vector3::zeros(), Vector3::new(-135.0, -90.0, 600.0));
        let raw = det.detect_board(&SyntheticFrame::new(pose)).expect("detection");
        assert_eq!(raw.ids.len(), board.corner_count());
        assert_eq!(raw.marker_ids.len(), board.marker_count());

        let capped = det
            .detect_board(&SyntheticFrame {
                board_pose: Some(pose),
                max_corners: Some(3),
            })
            .expect("detection");
        assert_eq!(capped.ids, vec![0, 1, 2]);
        assert_eq!(det.frames(), 2);
    }
}
