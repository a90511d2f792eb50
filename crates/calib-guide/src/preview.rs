//! Board overlay and silhouette rendering for a candidate pose.

use crate::distortion::DistortionMap;
use calib_guide_charuco::CharucoBoard;
use calib_guide_core::{
    warp_perspective_gray, GrayImage, Homography, ImageSize, Intrinsics, Interpolation,
    PinholeCamera, Pose,
};
use nalgebra::{Matrix3, Point3};

#[cfg(feature = "tracing")]
use tracing::instrument;

const PREVIEW_BLACK: u8 = 64;
const PREVIEW_WHITE: u8 = 224;

/// Renders the board as the camera would see it under a given pose.
///
/// Projection happens at a reduced working resolution (`working_width`, image
/// aspect kept). [`BoardPreview::project`] scales the result back to the image
/// size; [`BoardPreview::silhouette`] stays at the working size.
#[derive(Clone, Debug)]
pub struct BoardPreview {
    image_size: ImageSize,
    work_w: usize,
    work_h: usize,
    /// Styled board raster, rows flipped to match the target pose convention.
    raster: GrayImage,
    shadow: GrayImage,
    /// Raster pixel -> board units.
    raster_to_board: Matrix3<f64>,
    board_w: f64,
    board_h: f64,
    intrinsics: Intrinsics,
    distortion: Option<DistortionMap>,
}

impl BoardPreview {
    pub fn new(
        board: &CharucoBoard,
        image_size: ImageSize,
        px_per_square: usize,
        working_width: usize,
    ) -> Self {
        let px = px_per_square.max(1);
        let rendered = board.render(px);
        let mut raster = GrayImage::zeros(rendered.width, rendered.height);
        for y in 0..rendered.height {
            let src = rendered.height - 1 - y;
            for x in 0..rendered.width {
                let v = rendered.get(x, src).unwrap_or(0);
                raster.set(x, y, if v < 128 { PREVIEW_BLACK } else { PREVIEW_WHITE });
            }
        }
        let shadow = GrayImage::filled(rendered.width, rendered.height, 1);

        let units_per_px = board.spec().cell_size / px as f64;
        let raster_to_board = Matrix3::new(
            units_per_px,
            0.0,
            0.5 * units_per_px,
            0.0,
            units_per_px,
            0.5 * units_per_px,
            0.0,
            0.0,
            1.0,
        );
        let extent = board.board_units();

        let work_w = working_width.max(1);
        let aspect = image_size.height as f64 / image_size.width.max(1) as f64;
        let work_h = ((work_w as f64 * aspect).round() as usize).max(1);

        let initial = PinholeCamera::default_for_image(image_size, 1000.0);
        let mut preview = Self {
            image_size,
            work_w,
            work_h,
            raster,
            shadow,
            raster_to_board,
            board_w: extent.x,
            board_h: extent.y,
            intrinsics: initial.intrinsics,
            distortion: None,
        };
        preview.create_maps(&initial);
        preview
    }

    #[inline]
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// `(width, height)` of silhouettes.
    #[inline]
    pub fn working_size(&self) -> (usize, usize) {
        (self.work_w, self.work_h)
    }

    /// Adopt a new camera estimate: rescale the intrinsics to the working
    /// resolution and rebuild the distortion map.
    pub fn create_maps(&mut self, camera: &PinholeCamera) {
        let sx = self.work_w as f64 / self.image_size.width.max(1) as f64;
        let sy = self.work_h as f64 / self.image_size.height.max(1) as f64;
        self.intrinsics = camera.intrinsics.scaled(sx, sy);
        let working = PinholeCamera::new(self.intrinsics, camera.distortion);
        self.distortion = DistortionMap::new(&working, self.work_w, self.work_h);
    }

    /// Board overlay at the image resolution; black where the board is absent.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    pub fn project(&self, pose: &Pose) -> GrayImage {
        let working = self.render(&self.raster, pose);
        working.resize_nearest(
            self.image_size.width as usize,
            self.image_size.height as usize,
        )
    }

    /// Binary board footprint (1 inside, 0 outside) at the working resolution.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    pub fn silhouette(&self, pose: &Pose) -> GrayImage {
        self.render(&self.shadow, pose)
    }

    fn render(&self, src: &GrayImage, pose: &Pose) -> GrayImage {
        let blank = GrayImage::zeros(self.work_w, self.work_h);
        if !pose.is_finite() || !self.board_in_front(pose) {
            return blank;
        }
        let r = pose.rotation();
        let r = r.matrix();
        let t = pose.tvec;
        let extrinsic = Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            t.x,
            r[(1, 0)],
            r[(1, 1)],
            t.y,
            r[(2, 0)],
            r[(2, 1)],
            t.z,
        );
        let h = Homography::new(self.intrinsics.k_matrix() * extrinsic * self.raster_to_board);
        let Some(h_inv) = h.inverse() else {
            return blank;
        };
        let ideal = warp_perspective_gray(
            &src.view(),
            h_inv,
            self.work_w,
            self.work_h,
            Interpolation::Nearest,
        );
        match &self.distortion {
            Some(map) => map.remap(&ideal),
            None => ideal,
        }
    }

    fn board_in_front(&self, pose: &Pose) -> bool {
        [
            (0.0, 0.0),
            (self.board_w, 0.0),
            (0.0, self.board_h),
            (self.board_w, self.board_h),
        ]
        .iter()
        .all(|&(x, y)| pose.transform_point(&Point3::new(x, y, 0.0)).z > 0.0)
    }
}

/// Intersection over union of the nonzero pixels of two masks.
///
/// 0 when the sizes differ or both masks are empty.
pub fn jaccard_similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.width != b.width || a.height != b.height {
        return 0.0;
    }
    let (mut inter, mut count_a, mut count_b) = (0usize, 0usize, 0usize);
    for (&pa, &pb) in a.data.iter().zip(&b.data) {
        let (ia, ib) = (pa != 0, pb != 0);
        count_a += ia as usize;
        count_b += ib as usize;
        inter += (ia && ib) as usize;
    }
    let union = count_a + count_b - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_guide_charuco::CharucoBoardSpec;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    fn board() -> CharucoBoard {
        CharucoBoard::new(CharucoBoardSpec::default()).expect("board")
    }

    fn centered_pose(z: f64) -> Pose {
        // 270 x 180 board, flipped to face the camera, centered on the axis
        Pose::new(Vector3::new(PI, 0.0, 0.0), Vector3::new(-135.0, 90.0, z))
    }

    #[test]
    fn working_size_keeps_the_aspect() {
        let preview = BoardPreview::new(&board(), ImageSize::new(1280, 720), 12, 640);
        assert_eq!(preview.working_size(), (640, 360));
    }

    #[test]
    fn silhouette_covers_the_projected_board() {
        let preview = BoardPreview::new(&board(), ImageSize::new(1280, 720), 12, 640);
        let mask = preview.silhouette(&centered_pose(1000.0));
        // board spans 270 px x 180 px at full resolution, half that here
        let area = mask.count_nonzero() as f64;
        assert!((area - 135.0 * 90.0).abs() < 0.05 * 135.0 * 90.0, "area {area}");
        assert_eq!(mask.get(320, 180), Some(1));
        assert_eq!(mask.get(5, 5), Some(0));
    }

    #[test]
    fn overlay_is_styled_and_full_size() {
        let preview = BoardPreview::new(&board(), ImageSize::new(1280, 720), 12, 640);
        let overlay = preview.project(&centered_pose(1000.0));
        assert_eq!((overlay.width, overlay.height), (1280, 720));
        assert!(overlay
            .data
            .iter()
            .all(|&v| v == 0 || v == PREVIEW_BLACK || v == PREVIEW_WHITE));
        assert!(overlay.count_nonzero() > 0);
    }

    #[test]
    fn board_behind_the_camera_renders_blank() {
        let preview = BoardPreview::new(&board(), ImageSize::new(640, 480), 12, 640);
        assert_eq!(preview.silhouette(&centered_pose(-500.0)).count_nonzero(), 0);
        let nan = Pose::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::new(0.0, 0.0, 500.0));
        assert_eq!(preview.silhouette(&nan).count_nonzero(), 0);
    }

    #[test]
    fn jaccard_bounds() {
        let mut a = GrayImage::zeros(10, 10);
        let mut b = GrayImage::zeros(10, 10);
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
        a.fill_rect(0, 0, 5, 10, 1);
        assert_eq!(jaccard_similarity(&a, &a), 1.0);
        b.fill_rect(5, 0, 10, 10, 1);
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
        b.fill_rect(0, 0, 10, 10, 1);
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < 1e-12);
        assert_eq!(jaccard_similarity(&a, &GrayImage::zeros(5, 5)), 0.0);
    }
}
