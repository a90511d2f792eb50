//! Target-pose generation.
//!
//! Poses place the board (flipped about its x axis so that it faces the
//! camera) in the camera frame. Projection parameters are targeted with an
//! orbital sweep around the board center, distortion coefficients with a
//! fronto-parallel pose over the image region most sensitive to them.

use crate::calibrator::{BootstrapStrategy, CalibrationPhase};
use crate::convergence::IntrinsicParam;
use crate::distortion::SensitivityGrid;
use calib_guide_core::{ImageSize, PinholeCamera, Pose};
use log::debug;
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_8, PI};

/// Source of target poses for the guidance loop.
pub trait PoseGenerator {
    /// Next target pose given the board extent `[w, h, w]`, the number of
    /// keyframes, the parameter to improve and the current camera estimate.
    fn get_pose(
        &mut self,
        board_units: &Vector3<f64>,
        nk: usize,
        tgt_param: IntrinsicParam,
        camera: &PinholeCamera,
    ) -> Pose;

    /// Calibration phase for a keyframe captured at the target generated
    /// with `nk` keyframes in the store: orbital, then planar full screen,
    /// then all parameters free.
    fn phase(&self, nk: usize) -> CalibrationPhase {
        match nk {
            0 => CalibrationPhase::Bootstrap(BootstrapStrategy::Orbital),
            1 => CalibrationPhase::Bootstrap(BootstrapStrategy::PlanarFullScreen),
            _ => CalibrationPhase::Active,
        }
    }

    /// Forget generator state for a new session.
    fn reset(&mut self) {}
}

/// Pose generator tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseGeneratorParams {
    /// Orbital distance in board widths.
    pub orbital_distance: f64,
    /// Largest sweep angle, degrees.
    pub max_sweep_deg: f64,
    /// Principal point offset for `cx`/`cy` targets, fraction of the image size.
    pub principal_offset: f64,
    /// Coverage grid cell, pixels.
    pub cell_px: usize,
    /// Region threshold relative to the peak sensitivity.
    pub sensitivity_threshold: f64,
    /// Smallest distortion rect width, fraction of the image width.
    pub min_rect_width: f64,
}

impl Default for PoseGeneratorParams {
    fn default() -> Self {
        Self {
            orbital_distance: 1.6,
            max_sweep_deg: 70.0,
            principal_offset: 0.05,
            cell_px: 20,
            sensitivity_threshold: 0.5,
            min_rect_width: 0.3,
        }
    }
}

/// Angles in `(0, max]` by binary subdivision: `max/2`, `max/4`, `3max/4`,
/// `max/8`, ... with alternating sign.
#[derive(Clone, Debug, PartialEq)]
pub struct BinarySubdivision {
    max: f64,
    level: u32,
    index: u64,
    sign: f64,
}

impl BinarySubdivision {
    pub fn new(max: f64) -> Self {
        Self {
            max,
            level: 1,
            index: 0,
            sign: 1.0,
        }
    }
}

impl Iterator for BinarySubdivision {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let denom = (1u64 << self.level) as f64;
        let value = (2 * self.index + 1) as f64 * self.max / denom;
        self.index += 1;
        if self.index >= 1u64 << (self.level - 1) {
            self.index = 0;
            // past ~1e-9 of resolution the sweep starts over
            self.level = if self.level >= 30 { 1 } else { self.level + 1 };
        }
        let out = self.sign * value;
        self.sign = -self.sign;
        Some(out)
    }
}

fn board_rotation(rx: f64, ry: f64, rz: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), ry)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), PI + rx)
        * Rotation3::from_axis_angle(&Vector3::z_axis(), rz)
}

fn board_center(board_units: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(board_units.x * 0.5, board_units.y * 0.5, 0.0)
}

/// Board rotated by `(rx, ry, rz)` about its center, which sits on the
/// optical axis `distance` board widths away.
pub fn orbital_pose(board_units: &Vector3<f64>, rx: f64, ry: f64, rz: f64, distance: f64) -> Pose {
    let rot = board_rotation(rx, ry, rz);
    let tvec = Vector3::new(0.0, 0.0, distance * board_units.z) - rot * board_center(board_units);
    Pose::from_rotation(&rot, tvec)
}

/// Fronto-parallel board centered in the image, as close as possible while
/// keeping it fully visible.
pub fn pose_planar_fullscreen(
    board_units: &Vector3<f64>,
    camera: &PinholeCamera,
    image_size: ImageSize,
) -> Pose {
    let k = &camera.intrinsics;
    let [w, h] = image_size.as_f64();
    let z = (k.fx * board_units.x / w).max(k.fy * board_units.y / h);
    let rot = board_rotation(0.0, 0.0, 0.0);
    let center = camera.unproject(&image_size.center(), z);
    Pose::from_rotation(&rot, center.coords - rot * board_center(board_units))
}

/// Fronto-parallel board filling the pixel rect `[x0, x1] x [y0, y1]`.
///
/// The rect is widened to `min_width` and grown to the board aspect. Portrait
/// rects turn the board by 90°. The result is kept inside the image.
pub fn pose_from_bounds(
    board_units: &Vector3<f64>,
    rect: [f64; 4],
    camera: &PinholeCamera,
    image_size: ImageSize,
    min_width: f64,
) -> Pose {
    let [img_w, img_h] = image_size.as_f64();
    let [mut x0, y0, mut x1, y1] = rect;

    if x1 - x0 < min_width {
        let cx = 0.5 * (x0 + x1);
        x0 = cx - 0.5 * min_width;
        x1 = cx + 0.5 * min_width;
    }

    let portrait = (y1 - y0) > (x1 - x0);
    let (foot_w, foot_h, rz) = if portrait {
        (board_units.y, board_units.x, FRAC_PI_2)
    } else {
        (board_units.x, board_units.y, 0.0)
    };

    // grow the short side until the rect has the footprint's aspect
    let aspect = foot_w / foot_h;
    let (mut rw, mut rh) = (x1 - x0, y1 - y0);
    if rw / rh < aspect {
        rw = rh * aspect;
    } else {
        rh = rw / aspect;
    }
    let shrink = (img_w / rw).min(img_h / rh).min(1.0);
    rw *= shrink;
    rh *= shrink;
    let cx = (0.5 * (x0 + x1)).clamp(0.5 * rw, img_w - 0.5 * rw);
    let cy = (0.5 * (y0 + y1)).clamp(0.5 * rh, img_h - 0.5 * rh);

    let z = camera.intrinsics.fx * foot_w / rw;
    let rot = board_rotation(0.0, 0.0, rz);
    let center = camera.unproject(&Point2::new(cx, cy), z);
    Pose::from_rotation(&rot, center.coords - rot * board_center(board_units))
}

/// Pose generator that sweeps orbital poses for projection parameters and
/// covers the image for distortion coefficients.
#[derive(Clone, Debug)]
pub struct PoseGeneratorDist {
    params: PoseGeneratorParams,
    image_size: ImageSize,
    sweeps: [BinarySubdivision; 2],
    pp_sign: f64,
    covered: Vec<bool>,
}

impl PoseGeneratorDist {
    pub fn new(image_size: ImageSize, params: PoseGeneratorParams) -> Self {
        let max = params.max_sweep_deg.to_radians();
        let cell = params.cell_px.max(1);
        let cells = (image_size.width as usize).div_ceil(cell)
            * (image_size.height as usize).div_ceil(cell);
        Self {
            params,
            image_size,
            sweeps: [BinarySubdivision::new(max), BinarySubdivision::new(max)],
            pp_sign: 1.0,
            covered: vec![false; cells],
        }
    }

    #[inline]
    pub fn params(&self) -> &PoseGeneratorParams {
        &self.params
    }

    /// Fraction of the coverage grid already used by distortion poses.
    pub fn coverage(&self) -> f64 {
        if self.covered.is_empty() {
            return 0.0;
        }
        self.covered.iter().filter(|c| **c).count() as f64 / self.covered.len() as f64
    }

    fn orbital_sweep(
        &mut self,
        board_units: &Vector3<f64>,
        tgt_param: IntrinsicParam,
        camera: &PinholeCamera,
    ) -> Pose {
        // fx is observed by tilting about y, fy about x
        let axis = (tgt_param.index() + 1) % 2;
        let angle = self.sweeps[axis].next().unwrap_or(FRAC_PI_4);
        let (rx, ry) = if axis == 0 { (angle, 0.0) } else { (0.0, angle) };
        let mut pose = orbital_pose(board_units, rx, ry, FRAC_PI_8, self.params.orbital_distance);

        if matches!(tgt_param, IntrinsicParam::Cx | IntrinsicParam::Cy) {
            let [w, h] = self.image_size.as_f64();
            let k = &camera.intrinsics;
            let off = self.params.principal_offset * self.pp_sign;
            self.pp_sign = -self.pp_sign;
            let shifted = Point2::new(k.cx + off * w, k.cy + off * h);
            let p = camera.unproject(&shifted, pose.tvec.z);
            pose.tvec += Vector3::new(p.x, p.y, 0.0);
        }
        debug!(
            "orbital target for {tgt_param}: axis {}, {:.1} deg",
            if axis == 0 { "x" } else { "y" },
            angle.to_degrees()
        );
        pose
    }

    fn distortion_target(
        &mut self,
        board_units: &Vector3<f64>,
        tgt_param: IntrinsicParam,
        camera: &PinholeCamera,
    ) -> Pose {
        let mut grid =
            SensitivityGrid::for_param(camera, self.image_size, tgt_param, self.params.cell_px);
        for (v, covered) in grid.values.iter_mut().zip(&self.covered) {
            if *covered {
                *v = 0.0;
            }
        }
        let peak = grid
            .argmax()
            .filter(|&i| grid.values[i] > 0.0)
            .and_then(|i| {
                grid.flood_bounds(i, self.params.sensitivity_threshold * grid.values[i])
            });
        let Some((c0, r0, c1, r1)) = peak else {
            debug!("image covered for {tgt_param}, aiming at the principal point");
            return orbital_pose(board_units, 0.0, 0.0, 0.0, self.params.orbital_distance);
        };

        let cell = grid.cell_px;
        for r in r0..=r1 {
            for c in c0..=c1 {
                self.covered[r * grid.cols + c] = true;
            }
        }
        let rect = [
            (c0 * cell) as f64,
            (r0 * cell) as f64,
            ((c1 + 1) * cell) as f64,
            ((r1 + 1) * cell) as f64,
        ];
        debug!("distortion target for {tgt_param}: rect {rect:?}");
        pose_from_bounds(
            board_units,
            rect,
            camera,
            self.image_size,
            self.params.min_rect_width * self.image_size.width as f64,
        )
    }
}

impl PoseGenerator for PoseGeneratorDist {
    fn get_pose(
        &mut self,
        board_units: &Vector3<f64>,
        nk: usize,
        tgt_param: IntrinsicParam,
        camera: &PinholeCamera,
    ) -> Pose {
        match nk {
            0 => orbital_pose(board_units, 0.0, FRAC_PI_4, 0.0, self.params.orbital_distance),
            1 => pose_planar_fullscreen(board_units, camera, self.image_size),
            _ if tgt_param.is_projection() => self.orbital_sweep(board_units, tgt_param, camera),
            _ => self.distortion_target(board_units, tgt_param, camera),
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.image_size, self.params.clone());
    }
}

/// Board center in the camera frame.
pub fn board_center_in_camera(board_units: &Vector3<f64>, pose: &Pose) -> Point3<f64> {
    pose.transform_point(&Point3::from(board_center(board_units)))
}
