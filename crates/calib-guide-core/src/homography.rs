use crate::{sample_bilinear_u8, sample_nearest, GrayImage, GrayImageView};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Homography) -> Self {
        Self::new(self.h * other.h)
    }

    /// Scale so that the Frobenius norm is one.
    pub fn normalized(&self) -> Self {
        let n = self.h.norm();
        if n > 1e-300 {
            Self::new(self.h / n)
        } else {
            *self
        }
    }
}

/// Sampling used by [`warp_perspective_gray`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Nearest,
    Bilinear,
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    // Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let cx = sx / n;
    let cy = sy / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

/// Undo the point normalization and fix the scale so that `h33 = 1`.
fn finish(hn: Matrix3<f64>, t_src: &Matrix3<f64>, t_dst: &Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    (s.abs() >= 1e-12).then(|| Homography::new(h / s))
}

/// The two DLT equations of the correspondence `(x, y) -> (u, v)`.
#[inline]
fn dlt_rows(src: &Point2<f64>, dst: &Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y, u, v) = (src.x, src.y, dst.x, dst.y);
    [
        [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
        [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
    ]
}

/// Estimate H such that `dst ~ H * src`.
///
/// Uses the normalized DLT for more than four correspondences and the exact
/// four point solver otherwise.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (
        <&[Point2<f64>; 4]>::try_from(src),
        <&[Point2<f64>; 4]>::try_from(dst),
    ) {
        return homography_from_4pt(s, d);
    }

    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = DMatrix::<f64>::zeros(2 * src.len(), 9);
    for (k, (p, q)) in src_n.iter().zip(&dst_n).enumerate() {
        for (r, row) in dlt_rows(p, q).iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                a[(2 * k + r, c)] = *value;
            }
        }
    }

    // h spans the (approximate) null space of A
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.total_cmp(r.1))
        .map(|(i, _)| i)?;
    let h = v_t.row(smallest);
    let hn = Matrix3::from_fn(|r, c| h[3 * r + c]);
    finish(hn, &t_src, &t_dst)
}

/// Exact homography from four correspondences (`dst ~ H * src`), `None` for
/// degenerate configurations. Corner order must match between the arrays.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    // with h33 = 1 the ninth DLT column moves to the right-hand side
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (p, q)) in src_n.iter().zip(&dst_n).enumerate() {
        for (r, row) in dlt_rows(p, q).iter().enumerate() {
            for c in 0..8 {
                a[(2 * k + r, c)] = row[c];
            }
            b[2 * k + r] = -row[8];
        }
    }
    let x = a.lu().solve(&b)?;
    let hn = Matrix3::from_fn(|r, c| if r == 2 && c == 2 { 1.0 } else { x[3 * r + c] });
    finish(hn, &t_src, &t_dst)
}

/// Warp `src` into an `out_w x out_h` raster: each destination pixel is mapped
/// to the source through `h_src_from_dst` and sampled. Pixels that land
/// outside the source are black.
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    h_src_from_dst: Homography,
    out_w: usize,
    out_h: usize,
    interpolation: Interpolation,
) -> GrayImage {
    let mut out = vec![0u8; out_w * out_h];

    for y in 0..out_h {
        for x in 0..out_w {
            let ps = h_src_from_dst.apply(Point2::new(x as f64, y as f64));
            out[y * out_w + x] = match interpolation {
                Interpolation::Nearest => sample_nearest(src, ps.x, ps.y),
                Interpolation::Bilinear => sample_bilinear_u8(src, ps.x, ps.y),
            };
        }
    }

    GrayImage {
        width: out_w,
        height: out_h,
        data: out,
    }
}
