//! Lens-distortion helpers for previews and pose planning.
//!
//! - [`DistortionMap`]: a precomputed lookup table that renders an ideal
//!   pinhole raster as the distorted camera would see it.
//! - [`SensitivityGrid`]: per-cell pixel displacement caused by a single
//!   distortion coefficient, used to aim distortion captures.

use crate::convergence::IntrinsicParam;
use calib_guide_core::{sample_nearest, GrayImage, ImageSize, PinholeCamera};
use nalgebra::{Point2, Vector2};

/// Lookup table from distorted pixels to ideal (undistorted) pixels.
#[derive(Clone, Debug)]
pub struct DistortionMap {
    width: usize,
    height: usize,
    map: Vec<[f32; 2]>,
}

impl DistortionMap {
    /// Build the table for a `width x height` raster seen through `camera`.
    /// Returns `None` when the camera has no distortion.
    pub fn new(camera: &PinholeCamera, width: usize, height: usize) -> Option<Self> {
        if camera.distortion.is_zero() {
            return None;
        }
        let k = &camera.intrinsics;
        let mut map = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let n = camera.normalize(&Point2::new(x as f64, y as f64));
                map.push([(k.fx * n.x + k.cx) as f32, (k.fy * n.y + k.cy) as f32]);
            }
        }
        Some(Self { width, height, map })
    }

    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Resample `src` (same size as the table) with nearest-neighbour lookup.
    /// Returns `src` unchanged on a size mismatch.
    pub fn remap(&self, src: &GrayImage) -> GrayImage {
        if src.width != self.width || src.height != self.height {
            return src.clone();
        }
        let view = src.view();
        let data = self
            .map
            .iter()
            .map(|&[x, y]| sample_nearest(&view, x as f64, y as f64))
            .collect();
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Values on a regular grid of `cell_px` square cells covering an image.
#[derive(Clone, Debug, PartialEq)]
pub struct SensitivityGrid {
    pub cols: usize,
    pub rows: usize,
    pub cell_px: usize,
    pub values: Vec<f64>,
}

impl SensitivityGrid {
    /// Pixel displacement per unit of `param` at every cell center.
    ///
    /// Displacements are the analytic derivatives of the distortion model
    /// with respect to the coefficient, scaled by the focal lengths. Non
    /// distortion parameters yield an all-zero grid.
    pub fn for_param(
        camera: &PinholeCamera,
        image_size: ImageSize,
        param: IntrinsicParam,
        cell_px: usize,
    ) -> Self {
        let cell_px = cell_px.max(1);
        let cols = (image_size.width as usize).div_ceil(cell_px);
        let rows = (image_size.height as usize).div_ceil(cell_px);
        let k = &camera.intrinsics;
        let mut values = Vec::with_capacity(cols * rows);
        for r in 0..rows {
            for c in 0..cols {
                let center = Point2::new(
                    (c as f64 + 0.5) * cell_px as f64,
                    (r as f64 + 0.5) * cell_px as f64,
                );
                let d = coefficient_derivative(camera.normalize(&center), param);
                values.push(Vector2::new(k.fx * d.x, k.fy * d.y).norm());
            }
        }
        Self {
            cols,
            rows,
            cell_px,
            values,
        }
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    /// Index of the largest finite value.
    pub fn argmax(&self) -> Option<usize> {
        calib_guide_core::argmax(&self.values)
    }

    /// Bounding box `(c0, r0, c1, r1)` (inclusive) of the 4-connected region
    /// grown from `seed` over cells with values `>= threshold`.
    pub fn flood_bounds(&self, seed: usize, threshold: f64) -> Option<(usize, usize, usize, usize)> {
        if seed >= self.values.len() || !(self.values[seed] >= threshold) {
            return None;
        }
        let mut visited = vec![false; self.values.len()];
        let mut stack = vec![seed];
        visited[seed] = true;
        let (mut c0, mut r0) = (usize::MAX, usize::MAX);
        let (mut c1, mut r1) = (0, 0);
        while let Some(i) = stack.pop() {
            let (c, r) = (i % self.cols, i / self.cols);
            c0 = c0.min(c);
            r0 = r0.min(r);
            c1 = c1.max(c);
            r1 = r1.max(r);
            let mut push = |j: usize| {
                if !visited[j] && self.values[j] >= threshold {
                    visited[j] = true;
                    stack.push(j);
                }
            };
            if c > 0 {
                push(i - 1);
            }
            if c + 1 < self.cols {
                push(i + 1);
            }
            if r > 0 {
                push(i - self.cols);
            }
            if r + 1 < self.rows {
                push(i + self.cols);
            }
        }
        Some((c0, r0, c1, r1))
    }
}

/// d(distorted normalized point)/d(coefficient) at undistorted point `p`.
fn coefficient_derivative(p: Vector2<f64>, param: IntrinsicParam) -> Vector2<f64> {
    let (x, y) = (p.x, p.y);
    let r2 = x * x + y * y;
    match param {
        IntrinsicParam::K1 => p * r2,
        IntrinsicParam::K2 => p * (r2 * r2),
        IntrinsicParam::K3 => p * (r2 * r2 * r2),
        IntrinsicParam::P1 => Vector2::new(2.0 * x * y, r2 + 2.0 * y * y),
        IntrinsicParam::P2 => Vector2::new(r2 + 2.0 * x * x, 2.0 * x * y),
        _ => Vector2::zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_guide_core::{Distortion, Intrinsics};

    fn camera(distortion: Distortion) -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 159.5,
                cy: 119.5,
            },
            distortion,
        )
    }

    #[test]
    fn zero_distortion_needs_no_map() {
        assert!(DistortionMap::new(&camera(Distortion::ZERO), 320, 240).is_none());
    }

    #[test]
    fn remap_keeps_the_center_and_moves_the_corners() {
        let cam = camera(Distortion {
            k1: -0.3,
            ..Distortion::ZERO
        });
        let map = DistortionMap::new(&cam, 320, 240).expect("map");
        let mut src = GrayImage::zeros(320, 240);
        src.fill_rect(150, 110, 170, 130, 255);
        let out = map.remap(&src);
        assert_eq!(out.get(160, 120), Some(255));
        // barrel distortion pulls the ideal image inwards: corners sample
        // from outside the source raster
        assert_eq!(out.get(0, 0), Some(0));
    }

    #[test]
    fn radial_sensitivity_peaks_at_the_corners() {
        let size = ImageSize::new(320, 240);
        let grid = SensitivityGrid::for_param(&camera(Distortion::ZERO), size, IntrinsicParam::K1, 20);
        assert_eq!((grid.cols, grid.rows), (16, 12));
        let center = grid.get(8, 6);
        let corner = grid.get(0, 0);
        assert!(corner > 10.0 * center, "corner {corner} center {center}");
        let projection = SensitivityGrid::for_param(&camera(Distortion::ZERO), size, IntrinsicParam::Fx, 20);
        assert!(projection.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn flood_fill_stays_in_the_connected_region() {
        let mut grid = SensitivityGrid {
            cols: 4,
            rows: 3,
            cell_px: 10,
            values: vec![0.0; 12],
        };
        grid.values[0] = 1.0;
        grid.values[1] = 0.8;
        grid.values[11] = 0.9;
        assert_eq!(grid.flood_bounds(0, 0.5), Some((0, 0, 1, 0)));
        assert_eq!(grid.flood_bounds(5, 0.5), None);
    }
}
