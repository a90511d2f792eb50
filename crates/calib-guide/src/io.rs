//! JSON session configuration and calibration record.

use crate::calibrator::{Calibrator, CalibratorParams};
use crate::guidance::GuidanceParams;
use crate::posegen::PoseGeneratorParams;
use crate::simulate::SimulationParams;
use calib_guide_charuco::{CharucoBoard, CharucoBoardError, CharucoBoardSpec, CharucoDetectorParams};
use calib_guide_core::{Distortion, ImageSize, Intrinsics, PinholeCamera};
use calib_guide_solver::CalibrationSolver;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

#[derive(thiserror::Error, Debug)]
pub enum GuideIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Board(#[from] CharucoBoardError),
    #[error("no calibration to export")]
    NotCalibrated,
}

fn default_image_size() -> ImageSize {
    ImageSize::new(1280, 720)
}

/// Everything needed to run a guided session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub board: CharucoBoardSpec,
    #[serde(default = "default_image_size")]
    pub image_size: ImageSize,
    #[serde(default)]
    pub guidance: GuidanceParams,
    #[serde(default)]
    pub calibrator: CalibratorParams,
    #[serde(default)]
    pub pose_generator: PoseGeneratorParams,
    #[serde(default)]
    pub detector: CharucoDetectorParams,
    #[serde(default)]
    pub simulation: SimulationParams,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            board: CharucoBoardSpec::default(),
            image_size: default_image_size(),
            guidance: GuidanceParams::default(),
            calibrator: CalibratorParams::default(),
            pose_generator: PoseGeneratorParams::default(),
            detector: CharucoDetectorParams::default(),
            simulation: SimulationParams::default(),
            output_path: None,
        }
    }
}

impl SessionConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GuideIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GuideIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the calibration record path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("calibration.json"))
    }

    /// Build a validated ChArUco board from the config.
    pub fn build_board(&self) -> Result<CharucoBoard, GuideIoError> {
        Ok(CharucoBoard::new(self.board.clone())?)
    }
}

/// Dense matrix in the `rows`/`cols`/`dt`/`data` layout of OpenCV storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub rows: usize,
    pub cols: usize,
    pub dt: String,
    /// Row-major values.
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        Self {
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }
}

/// Exported calibration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub camera_matrix: MatrixRecord,
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion_coefficients: [f64; 5],
    pub avg_reprojection_error: f64,
    /// `[width, height]` in pixels.
    pub img_size: [u32; 2],
    /// `[cols, rows]` in squares.
    pub board_size: [u32; 2],
    pub square_size: f64,
    pub marker_size: f64,
    /// Unix time in seconds.
    pub calibration_time: u64,
}

impl CalibrationRecord {
    pub fn new(
        camera: &PinholeCamera,
        reperr: f64,
        image_size: ImageSize,
        board: &CharucoBoardSpec,
    ) -> Self {
        Self {
            camera_matrix: MatrixRecord::from_row_major(
                3,
                3,
                camera.intrinsics.k_row_major().to_vec(),
            ),
            distortion_coefficients: camera.distortion.as_array(),
            avg_reprojection_error: reperr,
            img_size: [image_size.width, image_size.height],
            board_size: [board.cols, board.rows],
            square_size: board.cell_size,
            marker_size: board.cell_size * board.marker_size_rel,
            calibration_time: current_timestamp(),
        }
    }

    /// Record of the calibrator's current estimate.
    pub fn from_calibrator<S: CalibrationSolver>(
        calib: &Calibrator<S>,
        board: &CharucoBoardSpec,
    ) -> Result<Self, GuideIoError> {
        let camera = calib.camera().ok_or(GuideIoError::NotCalibrated)?;
        Ok(Self::new(&camera, calib.reperr(), calib.image_size(), board))
    }

    /// Camera model stored in the record. `None` for a malformed matrix.
    pub fn camera(&self) -> Option<PinholeCamera> {
        let m = &self.camera_matrix;
        if m.rows != 3 || m.cols != 3 || m.data.len() != 9 {
            return None;
        }
        Some(PinholeCamera::new(
            Intrinsics {
                fx: m.data[0],
                fy: m.data[4],
                cx: m.data[2],
                cy: m.data[5],
            },
            Distortion::from_array(self.distortion_coefficients),
        ))
    }

    /// Load a record from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GuideIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this record to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GuideIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Current Unix timestamp in seconds; 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_keeps_the_camera() {
        let camera = PinholeCamera::new(
            Intrinsics {
                fx: 910.0,
                fy: 905.0,
                cx: 641.0,
                cy: 358.0,
            },
            Distortion::from_array([-0.1, 0.02, 0.001, -0.002, 0.0]),
        );
        let record = CalibrationRecord::new(
            &camera,
            0.25,
            ImageSize::new(1280, 720),
            &CharucoBoardSpec::default(),
        );
        assert_eq!(record.camera_matrix.data[8], 1.0);
        assert_eq!(record.board_size, [9, 6]);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calibration.json");
        record.write_json(&path).expect("write");
        let back = CalibrationRecord::load_json(&path).expect("load");
        assert_eq!(back, record);
        assert_eq!(back.camera(), Some(camera));
    }

    #[test]
    fn config_fills_defaults() {
        let cfg: SessionConfig = serde_json::from_str(
            r#"{"board":{"rows":5,"cols":7,"cell_size":25.0,"marker_size_rel":0.7}}"#,
        )
        .expect("config");
        assert_eq!(cfg.image_size, ImageSize::new(1280, 720));
        assert_eq!(cfg.guidance.min_pts_initial, 27);
        assert_eq!(cfg.output_path(), PathBuf::from("calibration.json"));
        assert_eq!(cfg.build_board().expect("board").corner_count(), 24);
    }

    #[test]
    fn uncalibrated_export_fails() {
        let calib = Calibrator::new(ImageSize::new(640, 480), CalibratorParams::default());
        assert!(matches!(
            CalibrationRecord::from_calibrator(&calib, &CharucoBoardSpec::default()),
            Err(GuideIoError::NotCalibrated)
        ));
    }
}
