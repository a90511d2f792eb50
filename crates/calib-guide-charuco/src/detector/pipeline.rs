use super::{CharucoDetectError, CharucoDetectorParams, FrameDetection, RawBoardDetection};
use crate::board::CharucoBoard;
use calib_guide_core::{Keyframe, PinholeCamera};
use calib_guide_solver::{PlanarPnp, PoseSolver};
use log::{debug, warn};
use nalgebra::Point2;
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Source of raw ChArUco corner detections (marker decoding + corner
/// interpolation). `Frame` is whatever the backend consumes: an image, a
/// simulated camera state, a recorded detection.
pub trait BoardDetector {
    type Frame: ?Sized;

    fn detect_board(
        &mut self,
        frame: &Self::Frame,
    ) -> Result<RawBoardDetection, CharucoDetectError>;
}

/// Frame-level ChArUco detector: wraps a [`BoardDetector`] backend and adds
/// PnP pose estimation and inter-frame corner flow.
pub struct CharucoDetector<D, P = PlanarPnp> {
    board: CharucoBoard,
    params: CharucoDetectorParams,
    backend: D,
    pnp: P,
    camera: Option<PinholeCamera>,
    last: FrameDetection,
    prev_corners: HashMap<u32, Point2<f64>>,
}

impl<D: BoardDetector> CharucoDetector<D, PlanarPnp> {
    /// Create a detector with the default planar PnP solver.
    pub fn new(board: CharucoBoard, params: CharucoDetectorParams, backend: D) -> Self {
        Self::with_pose_solver(board, params, backend, PlanarPnp::default())
    }
}

impl<D: BoardDetector, P: PoseSolver> CharucoDetector<D, P> {
    pub fn with_pose_solver(
        board: CharucoBoard,
        params: CharucoDetectorParams,
        backend: D,
        pnp: P,
    ) -> Self {
        Self {
            board,
            params,
            backend,
            pnp,
            camera: None,
            last: FrameDetection::empty(),
            prev_corners: HashMap::new(),
        }
    }

    /// Board definition used by the detector.
    #[inline]
    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    /// Detector parameters.
    #[inline]
    pub fn params(&self) -> &CharucoDetectorParams {
        &self.params
    }

    #[inline]
    pub fn backend(&self) -> &D {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut D {
        &mut self.backend
    }

    /// Intrinsics used for pose estimation, if set.
    #[inline]
    pub fn intrinsics(&self) -> Option<&PinholeCamera> {
        self.camera.as_ref()
    }

    /// Enable pose estimation with the given camera model.
    pub fn set_intrinsics(&mut self, camera: PinholeCamera) {
        self.camera = Some(camera);
    }

    pub fn clear_intrinsics(&mut self) {
        self.camera = None;
    }

    /// Detection state of the most recent frame.
    #[inline]
    pub fn last(&self) -> &FrameDetection {
        &self.last
    }

    /// Run the backend on `frame` and update the per-frame state.
    ///
    /// Backend failures and inconsistent detections are logged and yield an
    /// empty detection; they never propagate.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    pub fn detect(&mut self, frame: &D::Frame) -> FrameDetection {
        let detection = match self
            .backend
            .detect_board(frame)
            .and_then(|raw| self.accept(raw))
        {
            Ok(det) => det,
            Err(
                err @ (CharucoDetectError::BoardNotDetected
                | CharucoDetectError::TooFewMarkers { .. }),
            ) => {
                debug!("no board: {err}");
                FrameDetection::empty()
            }
            Err(err) => {
                warn!("skipping frame: {err}");
                FrameDetection::empty()
            }
        };

        self.prev_corners = detection
            .ids
            .iter()
            .copied()
            .zip(detection.corners.iter().copied())
            .collect();
        self.last = detection.clone();
        detection
    }

    fn accept(&self, raw: RawBoardDetection) -> Result<FrameDetection, CharucoDetectError> {
        if raw.marker_ids.len() < self.params.min_markers {
            return Err(CharucoDetectError::TooFewMarkers {
                found: raw.marker_ids.len(),
                required: self.params.min_markers,
            });
        }
        let (object, image) = self.board.match_image_points(&raw.corners, &raw.ids)?;
        let mean_flow = self.mean_flow(&raw.corners, &raw.ids);

        let pose = match &self.camera {
            Some(camera) if raw.ids.len() >= self.params.min_corners => {
                match self.pnp.solve_pnp(&object, &image, camera) {
                    Ok(pose) => Some(pose),
                    Err(err) => {
                        debug!("pose estimation failed: {err}");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(FrameDetection {
            corners: raw.corners,
            ids: raw.ids,
            pose,
            mean_flow,
        })
    }

    /// Mean corner displacement when exactly the previous id set is seen.
    fn mean_flow(&self, corners: &[Point2<f64>], ids: &[u32]) -> f64 {
        if ids.is_empty() || ids.len() != self.prev_corners.len() {
            return f64::INFINITY;
        }
        let mut total = 0.0;
        for (id, p) in ids.iter().zip(corners) {
            match self.prev_corners.get(id) {
                Some(q) => total += (p - q).norm(),
                None => return f64::INFINITY,
            }
        }
        total / ids.len() as f64
    }

    /// Snapshot of the current detection as a keyframe.
    pub fn get_calib_pts(&self) -> Result<Keyframe, CharucoDetectError> {
        let (object, image) = self
            .board
            .match_image_points(&self.last.corners, &self.last.ids)?;
        Ok(Keyframe::new(image, object)?)
    }
}
