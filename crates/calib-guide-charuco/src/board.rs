//! Board specification and layout helpers for ChArUco.

use calib_guide_core::GrayImage;
use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Marker placement scheme for the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerLayout {
    /// OpenCV-style ChArUco layout:
    /// - markers are placed on white squares only (assuming top-left square is black),
    /// - marker IDs are assigned sequentially in row-major order over those squares.
    #[serde(rename = "opencv_charuco", alias = "open_cv_charuco")]
    #[default]
    OpenCvCharuco,
}

fn default_dictionary() -> String {
    "DICT_4X4_50".to_string()
}

/// Static ChArUco board specification.
///
/// `rows`/`cols` are **square counts** (not inner corner counts). Lengths
/// share one arbitrary unit (e.g. millimetres).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoardSpec {
    pub rows: u32,
    pub cols: u32,
    pub cell_size: f64,
    pub marker_size_rel: f64,
    /// OpenCV-style dictionary name, `DICT_<b>X<b>_<count>`.
    #[serde(default = "default_dictionary")]
    pub dictionary: String,
    #[serde(default)]
    pub marker_layout: MarkerLayout,
}

impl Default for CharucoBoardSpec {
    /// 9 x 6 squares of 30 units with 4x4 markers.
    fn default() -> Self {
        Self {
            rows: 6,
            cols: 9,
            cell_size: 30.0,
            marker_size_rel: 0.75,
            dictionary: default_dictionary(),
            marker_layout: MarkerLayout::OpenCvCharuco,
        }
    }
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CharucoBoardError {
    #[error("rows and cols must be >= 2")]
    InvalidSize,
    #[error("cell_size must be > 0")]
    InvalidCellSize,
    #[error("marker_size_rel must be in (0, 1)")]
    InvalidMarkerSizeRel,
    #[error("unknown marker dictionary {0:?}")]
    UnknownDictionary(String),
    #[error("board needs {needed} markers, dictionary has {available}")]
    NotEnoughDictionaryCodes { needed: usize, available: usize },
}

/// Errors matching detected corner ids to board points.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PointMatchError {
    #[error("{corners} corners but {ids} ids")]
    LengthMismatch { corners: usize, ids: usize },
    #[error("corner id {0} is not on the board")]
    UnknownCornerId(u32),
    #[error("corner id {0} appears more than once")]
    DuplicateCornerId(u32),
}

/// `(bits per side, code count)` parsed from `DICT_<b>X<b>_<count>`.
fn parse_dictionary(name: &str) -> Option<(u32, usize)> {
    let rest = name.strip_prefix("DICT_")?;
    let (size, count) = rest.split_once('_')?;
    let (a, b) = size.split_once('X')?;
    let bits: u32 = a.parse().ok()?;
    if b.parse::<u32>().ok()? != bits || !(3..=8).contains(&bits) {
        return None;
    }
    Some((bits, count.parse().ok()?))
}

/// Precomputed board mapping helpers.
#[derive(Clone, Debug)]
pub struct CharucoBoard {
    spec: CharucoBoardSpec,
    marker_positions: Vec<[i32; 2]>,
    marker_bits: u32,
}

impl CharucoBoard {
    /// Validate and create a board from a spec.
    pub fn new(spec: CharucoBoardSpec) -> Result<Self, CharucoBoardError> {
        if spec.rows < 2 || spec.cols < 2 {
            return Err(CharucoBoardError::InvalidSize);
        }
        if !spec.cell_size.is_finite() || spec.cell_size <= 0.0 {
            return Err(CharucoBoardError::InvalidCellSize);
        }
        if !spec.marker_size_rel.is_finite()
            || spec.marker_size_rel <= 0.0
            || spec.marker_size_rel >= 1.0
        {
            return Err(CharucoBoardError::InvalidMarkerSizeRel);
        }
        let (marker_bits, available) = parse_dictionary(&spec.dictionary)
            .ok_or_else(|| CharucoBoardError::UnknownDictionary(spec.dictionary.clone()))?;

        let marker_positions = match spec.marker_layout {
            MarkerLayout::OpenCvCharuco => open_cv_charuco_marker_positions(spec.rows, spec.cols),
        };

        let needed = marker_positions.len();
        if available < needed {
            return Err(CharucoBoardError::NotEnoughDictionaryCodes { needed, available });
        }

        Ok(Self {
            spec,
            marker_positions,
            marker_bits,
        })
    }

    /// Return the underlying board specification.
    #[inline]
    pub fn spec(&self) -> &CharucoBoardSpec {
        &self.spec
    }

    /// Expected number of *inner* chessboard corners in vertical direction.
    #[inline]
    pub fn expected_inner_rows(&self) -> u32 {
        self.spec.rows - 1
    }

    /// Expected number of *inner* chessboard corners in horizontal direction.
    #[inline]
    pub fn expected_inner_cols(&self) -> u32 {
        self.spec.cols - 1
    }

    /// Total number of ChArUco corners.
    #[inline]
    pub fn corner_count(&self) -> usize {
        (self.expected_inner_rows() * self.expected_inner_cols()) as usize
    }

    /// Number of markers on the board.
    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_positions.len()
    }

    /// Mapping from marker id -> board cell (square) coordinates.
    #[inline]
    pub fn marker_position(&self, id: u32) -> Option<[i32; 2]> {
        self.marker_positions.get(id as usize).copied()
    }

    /// Marker side length in board units.
    #[inline]
    pub fn marker_size(&self) -> f64 {
        self.spec.cell_size * self.spec.marker_size_rel
    }

    /// Board extent `[width, height, width]` in board units. The third
    /// component is the depth scale used when placing the board in front of
    /// the camera.
    pub fn board_units(&self) -> Vector3<f64> {
        let w = self.spec.cols as f64 * self.spec.cell_size;
        let h = self.spec.rows as f64 * self.spec.cell_size;
        Vector3::new(w, h, w)
    }

    /// Convert a board **corner coordinate** `(i, j)` into a ChArUco corner id.
    ///
    /// Returns `None` if the corner is outside the inner corner range.
    pub fn charuco_corner_id_from_board_corner(&self, i: i32, j: i32) -> Option<u32> {
        let cols = i32::try_from(self.spec.cols).ok()?;
        let rows = i32::try_from(self.spec.rows).ok()?;

        if i <= 0 || j <= 0 || i >= cols || j >= rows {
            return None;
        }

        let inner_cols = cols - 1;
        Some(((j - 1) * inner_cols + (i - 1)) as u32)
    }

    /// Physical 2D point (board plane) for a ChArUco corner id.
    ///
    /// Coordinates are in the board reference frame with origin at the top-left board corner.
    pub fn charuco_object_xy(&self, id: u32) -> Option<Point2<f64>> {
        let cols = self.expected_inner_cols();
        if id as usize >= self.corner_count() {
            return None;
        }
        let i = (id % cols) as f64 + 1.0;
        let j = (id / cols) as f64 + 1.0;
        Some(Point2::new(i * self.spec.cell_size, j * self.spec.cell_size))
    }

    /// 3D object point (`z = 0`) for a ChArUco corner id.
    #[inline]
    pub fn object_point(&self, id: u32) -> Option<Point3<f64>> {
        self.charuco_object_xy(id).map(|p| Point3::new(p.x, p.y, 0.0))
    }

    /// Pair detected corners with their board points.
    ///
    /// Returns `(object_points, image_points)` in detection order.
    pub fn match_image_points(
        &self,
        corners: &[Point2<f64>],
        ids: &[u32],
    ) -> Result<(Vec<Point3<f64>>, Vec<Point2<f64>>), PointMatchError> {
        if corners.len() != ids.len() {
            return Err(PointMatchError::LengthMismatch {
                corners: corners.len(),
                ids: ids.len(),
            });
        }
        let mut seen = HashSet::with_capacity(ids.len());
        let mut object = Vec::with_capacity(ids.len());
        for &id in ids {
            if !seen.insert(id) {
                return Err(PointMatchError::DuplicateCornerId(id));
            }
            object.push(
                self.object_point(id)
                    .ok_or(PointMatchError::UnknownCornerId(id))?,
            );
        }
        Ok((object, corners.to_vec()))
    }

    /// Render the board: black squares and markers are 0, white is 255.
    ///
    /// Marker interiors use a deterministic id-derived bit pattern with the
    /// dictionary's bit count; they are meant for previews, not for printing.
    pub fn render(&self, px_per_square: usize) -> GrayImage {
        let px = px_per_square.max(1);
        let cols = self.spec.cols as usize;
        let rows = self.spec.rows as usize;
        let mut img = GrayImage::filled(cols * px, rows * px, 255);

        for sy in 0..rows {
            for sx in 0..cols {
                // top-left square is black
                if (sx + sy) % 2 == 0 {
                    img.fill_rect(sx * px, sy * px, (sx + 1) * px, (sy + 1) * px, 0);
                }
            }
        }

        let cells = self.marker_bits as usize + 2;
        let side = self.spec.marker_size_rel * px as f64;
        let cell_px = side / cells as f64;
        let inset = (px as f64 - side) * 0.5;
        for (id, &[sx, sy]) in self.marker_positions.iter().enumerate() {
            let pattern = marker_pattern(id as u64);
            let x0 = sx as f64 * px as f64 + inset;
            let y0 = sy as f64 * px as f64 + inset;
            for cy in 0..cells {
                for cx in 0..cells {
                    let border = cx == 0 || cy == 0 || cx == cells - 1 || cy == cells - 1;
                    let bit_idx = (cy.saturating_sub(1)) * self.marker_bits as usize
                        + cx.saturating_sub(1);
                    let white = !border && (pattern >> (bit_idx % 64)) & 1 == 1;
                    img.fill_rect(
                        (x0 + cx as f64 * cell_px).round() as usize,
                        (y0 + cy as f64 * cell_px).round() as usize,
                        (x0 + (cx + 1) as f64 * cell_px).round() as usize,
                        (y0 + (cy + 1) as f64 * cell_px).round() as usize,
                        if white { 255 } else { 0 },
                    );
                }
            }
        }
        img
    }
}

fn marker_pattern(id: u64) -> u64 {
    let mut z = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn open_cv_charuco_marker_positions(rows: u32, cols: u32) -> Vec<[i32; 2]> {
    let mut out = Vec::new();
    for j in 0..(rows as i32) {
        for i in 0..(cols as i32) {
            // OpenCV: top-left square is black => white squares have (i+j) odd.
            if ((i + j) & 1) == 1 {
                out.push([i, j]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_board() -> CharucoBoard {
        CharucoBoard::new(CharucoBoardSpec {
            rows: 5,
            cols: 6,
            cell_size: 10.0,
            marker_size_rel: 0.75,
            dictionary: "DICT_4X4_50".into(),
            marker_layout: MarkerLayout::OpenCvCharuco,
        })
        .expect("board")
    }

    #[test]
    fn corner_ids_are_row_major_over_inner_corners() {
        let board = build_board();
        assert_eq!(board.corner_count(), 20);
        assert_eq!(board.charuco_corner_id_from_board_corner(1, 1), Some(0));
        assert_eq!(board.charuco_corner_id_from_board_corner(2, 1), Some(1));
        assert_eq!(board.charuco_corner_id_from_board_corner(1, 2), Some(5));
        assert_eq!(board.charuco_corner_id_from_board_corner(0, 1), None);
        assert_eq!(board.object_point(6), Some(Point3::new(20.0, 20.0, 0.0)));
        assert_eq!(board.object_point(20), None);
    }

    #[test]
    fn dictionary_capacity_is_checked() {
        let spec = CharucoBoardSpec {
            rows: 12,
            cols: 12,
            dictionary: "DICT_4X4_50".into(),
            ..CharucoBoardSpec::default()
        };
        assert_eq!(
            CharucoBoard::new(spec).unwrap_err(),
            CharucoBoardError::NotEnoughDictionaryCodes {
                needed: 72,
                available: 50
            }
        );
        let spec = CharucoBoardSpec {
            dictionary: "DICT_FOO".into(),
            ..CharucoBoardSpec::default()
        };
        assert!(matches!(
            CharucoBoard::new(spec),
            Err(CharucoBoardError::UnknownDictionary(_))
        ));
    }

    #[test]
    fn matching_rejects_bad_ids() {
        let board = build_board();
        let corners = vec![Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)];
        assert_eq!(
            board.match_image_points(&corners, &[3, 3]),
            Err(PointMatchError::DuplicateCornerId(3))
        );
        assert_eq!(
            board.match_image_points(&corners, &[3, 99]),
            Err(PointMatchError::UnknownCornerId(99))
        );
        let (obj, img) = board.match_image_points(&corners, &[0, 1]).expect("match");
        assert_eq!(obj[1], Point3::new(20.0, 10.0, 0.0));
        assert_eq!(img, corners);
    }

    #[test]
    fn render_has_black_top_left_square() {
        let board = build_board();
        let img = board.render(20);
        assert_eq!((img.width, img.height), (120, 100));
        assert_eq!(img.get(2, 2), Some(0));
        // white square (1, 0) has a black marker border inside a white margin
        assert_eq!(img.get(21, 1), Some(255));
        assert_eq!(img.get(20 + 10, 3), Some(0));
    }

    #[test]
    fn spec_json_defaults_fill_dictionary() {
        let spec: CharucoBoardSpec =
            serde_json::from_str(r#"{"rows":6,"cols":9,"cell_size":30.0,"marker_size_rel":0.75}"#)
                .expect("spec");
        assert_eq!(spec.dictionary, "DICT_4X4_50");
        assert!(CharucoBoard::new(spec).is_ok());
    }
}
