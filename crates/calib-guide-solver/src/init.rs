//! Closed-form initialization from planar homographies.

use calib_guide_core::{estimate_homography, Homography, PinholeCamera, Pose};
use nalgebra::{Matrix2, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};

/// Board-plane coordinates of planar object points; `None` if any point is
/// off the `z = 0` plane.
pub fn planar_xy(object: &[Point3<f64>]) -> Option<Vec<Point2<f64>>> {
    let scale = object
        .iter()
        .map(|p| p.x.abs().max(p.y.abs()))
        .fold(1.0_f64, f64::max);
    object
        .iter()
        .map(|p| (p.z.abs() <= 1e-9 * scale).then(|| Point2::new(p.x, p.y)))
        .collect()
}

/// Focal lengths `(fx, fy)` from board-to-pixel homographies with a known
/// principal point.
///
/// Each view contributes the orthogonality and equal-norm constraints on the
/// first two rotation columns, solved for `1/fx²` and `1/fy²` in the least
/// squares sense. With `aspect = Some(a)` only `fy` is estimated and
/// `fx = a * fy`. Returns `None` for degenerate (e.g. fronto-parallel) input.
pub fn init_focal_lengths(
    homographies: &[Homography],
    principal: Point2<f64>,
    aspect: Option<f64>,
) -> Option<(f64, f64)> {
    let shift = Matrix3::new(
        1.0, 0.0, -principal.x, //
        0.0, 1.0, -principal.y, //
        0.0, 0.0, 1.0,
    );

    let mut rows: Vec<([f64; 2], f64)> = Vec::with_capacity(homographies.len() * 2);
    for h in homographies {
        let hc = Homography::new(shift * h.h).normalized().h;
        let (a1, b1, c1) = (hc[(0, 0)], hc[(1, 0)], hc[(2, 0)]);
        let (a2, b2, c2) = (hc[(0, 1)], hc[(1, 1)], hc[(2, 1)]);
        rows.push(([a1 * a2, b1 * b2], -c1 * c2));
        rows.push(([a1 * a1 - a2 * a2, b1 * b1 - b2 * b2], -(c1 * c1 - c2 * c2)));
    }

    let (inv_fx2, inv_fy2) = match aspect {
        Some(a) => {
            let a2 = a * a;
            let (num, den) = rows.iter().fold((0.0, 0.0), |(num, den), (coef, rhs)| {
                let c = coef[0] / a2 + coef[1];
                (num + c * rhs, den + c * c)
            });
            if den <= 1e-300 {
                return None;
            }
            let v = num / den;
            (v / a2, v)
        }
        None => {
            let mut ata = Matrix2::zeros();
            let mut atb = Vector2::zeros();
            for (coef, rhs) in &rows {
                let c = Vector2::new(coef[0], coef[1]);
                ata += c * c.transpose();
                atb += c * *rhs;
            }
            // Reject near-singular systems relative to their own scale.
            let det = ata.determinant();
            if det.abs() <= 1e-12 * ata.norm_squared() {
                return None;
            }
            let z = ata.try_inverse()? * atb;
            (z.x, z.y)
        }
    };

    if !(inv_fx2 > 0.0 && inv_fy2 > 0.0) {
        return None;
    }
    let fx = 1.0 / inv_fx2.sqrt();
    let fy = 1.0 / inv_fy2.sqrt();
    (fx.is_finite() && fy.is_finite()).then_some((fx, fy))
}

/// Pose from a homography mapping board `(X, Y)` to normalized image
/// coordinates. The board is placed in front of the camera.
pub fn pose_from_normalized_homography(h: &Homography) -> Option<Pose> {
    let m = h.h;
    let h1: Vector3<f64> = m.column(0).into_owned();
    let h2: Vector3<f64> = m.column(1).into_owned();
    let h3: Vector3<f64> = m.column(2).into_owned();

    let n1 = h1.norm();
    let n2 = h2.norm();
    if n1 < 1e-12 || n2 < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (n1 + n2);
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }

    let pose = Pose::from_rotation(&Rotation3::from_matrix_unchecked(r), t);
    pose.is_finite().then_some(pose)
}

/// Pose of a planar target from pixel observations under `camera`.
pub fn planar_pose(
    board_xy: &[Point2<f64>],
    image: &[Point2<f64>],
    camera: &PinholeCamera,
) -> Option<Pose> {
    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|p| Point2::from(camera.normalize(p)))
        .collect();
    let h = estimate_homography(board_xy, &normalized)?;
    pose_from_normalized_homography(&h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use calib_guide_core::{Distortion, Intrinsics};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 900.0,
                fy: 880.0,
                cx: 640.0,
                cy: 360.0,
            },
            Distortion::ZERO,
        )
    }

    fn board() -> Vec<Point2<f64>> {
        (0..5)
            .flat_map(|j| (0..7).map(move |i| Point2::new(i as f64 * 30.0, j as f64 * 30.0)))
            .collect()
    }

    fn observe(pose: &Pose, cam: &PinholeCamera) -> Vec<Point2<f64>> {
        board()
            .iter()
            .map(|p| {
                cam.project(pose, &Point3::new(p.x, p.y, 0.0))
                    .expect("visible")
            })
            .collect()
    }

    fn tilted_poses() -> Vec<Pose> {
        vec![
            Pose::new(Vector3::new(0.4, 0.1, 0.05), Vector3::new(-90.0, -60.0, 600.0)),
            Pose::new(Vector3::new(-0.1, 0.5, -0.1), Vector3::new(-100.0, -50.0, 650.0)),
            Pose::new(Vector3::new(0.3, -0.35, 0.2), Vector3::new(-80.0, -70.0, 700.0)),
        ]
    }

    #[test]
    fn pose_is_recovered_from_exact_observations() {
        let cam = camera();
        let truth = tilted_poses()[0];
        let pose = planar_pose(&board(), &observe(&truth, &cam), &cam).expect("pose");
        assert_abs_diff_eq!((pose.rvec - truth.rvec).norm(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!((pose.tvec - truth.tvec).norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn flipped_board_pose_is_recovered() {
        let cam = camera();
        let rot = Rotation3::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_6)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        let truth = Pose::from_rotation(&rot, Vector3::new(-90.0, 60.0, 600.0));
        let pose = planar_pose(&board(), &observe(&truth, &cam), &cam).expect("pose");
        assert_abs_diff_eq!(pose.rotation_angle_to(&truth), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!((pose.tvec - truth.tvec).norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn focal_lengths_from_tilted_views() {
        let cam = camera();
        let hs: Vec<Homography> = tilted_poses()
            .iter()
            .map(|pose| estimate_homography(&board(), &observe(pose, &cam)).expect("h"))
            .collect();
        let (fx, fy) = init_focal_lengths(&hs, Point2::new(640.0, 360.0), None).expect("focal");
        assert_abs_diff_eq!(fx, 900.0, epsilon = 1e-3);
        assert_abs_diff_eq!(fy, 880.0, epsilon = 1e-3);
    }

    #[test]
    fn fronto_parallel_view_is_degenerate() {
        let cam = camera();
        let pose = Pose::new(Vector3::zeros(), Vector3::new(-90.0, -60.0, 600.0));
        let h = estimate_homography(&board(), &observe(&pose, &cam)).expect("h");
        assert!(init_focal_lengths(&[h], Point2::new(640.0, 360.0), None).is_none());
    }

    #[test]
    fn non_planar_points_are_rejected() {
        let pts = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.5)];
        assert!(planar_xy(&pts).is_none());
    }
}
