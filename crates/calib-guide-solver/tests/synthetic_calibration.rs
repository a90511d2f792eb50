use calib_guide_core::{Distortion, ImageSize, Intrinsics, Keyframe, PinholeCamera, Pose};
use calib_guide_solver::{BundleCalibrator, CalibrationFlags, CalibrationSolver, PlanarPnp, PoseSolver};
use nalgebra::{Point2, Point3, Vector3};

const IMAGE: ImageSize = ImageSize {
    width: 1280,
    height: 720,
};

fn truth() -> PinholeCamera {
    PinholeCamera::new(
        Intrinsics {
            fx: 1100.0,
            fy: 1095.0,
            cx: 645.0,
            cy: 355.0,
        },
        Distortion {
            k1: -0.08,
            k2: 0.02,
            ..Distortion::ZERO
        },
    )
}

/// 11 x 7 squares -> 10 x 6 = 60 inner corners.
fn board() -> Vec<Point3<f64>> {
    (1..7)
        .flat_map(|j| (1..11).map(move |i| Point3::new(i as f64 * 25.0, j as f64 * 25.0, 0.0)))
        .collect()
}

/// Deterministic sub-pixel jitter.
fn jitter(seed: u64, k: usize) -> f64 {
    let mut z = seed
        .wrapping_add(k as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    ((z >> 11) as f64 / (1u64 << 53) as f64 - 0.5) * 0.2
}

fn keyframe(pose: &Pose, seed: u64) -> Keyframe {
    let cam = truth();
    let obj = board();
    let img: Vec<Point2<f64>> = obj
        .iter()
        .enumerate()
        .map(|(k, p)| {
            let q = cam.project(pose, p).expect("visible");
            Point2::new(q.x + jitter(seed, 2 * k), q.y + jitter(seed, 2 * k + 1))
        })
        .collect();
    Keyframe::new(img, obj).expect("keyframe")
}

fn poses() -> [Pose; 3] {
    [
        Pose::new(
            Vector3::new(std::f64::consts::PI + 0.4, 0.05, 0.0),
            Vector3::new(-140.0, 90.0, 600.0),
        ),
        Pose::new(
            Vector3::new(std::f64::consts::PI, 0.5, 0.1),
            Vector3::new(-130.0, 80.0, 650.0),
        ),
        Pose::new(
            Vector3::new(std::f64::consts::PI - 0.35, -0.3, -0.15),
            Vector3::new(-150.0, 85.0, 620.0),
        ),
    ]
}

#[test]
fn three_noisy_keyframes_give_finite_error_and_variances() {
    let views: Vec<Keyframe> = poses()
        .iter()
        .enumerate()
        .map(|(i, p)| keyframe(p, 17 + i as u64))
        .collect();
    let guess = PinholeCamera::default_for_image(IMAGE, 1000.0);

    let out = BundleCalibrator::default()
        .calibrate_camera(&views, IMAGE, &CalibrationFlags::all_free(), &guess)
        .expect("calibration");

    assert!(out.rms.is_finite() && out.rms >= 0.0);
    assert!(out.rms < 0.5, "rms {}", out.rms);
    assert_eq!(out.point_count, 180);
    for std in out.std_intrinsics {
        assert!(std.is_finite() && std >= 0.0);
    }
    assert!((out.camera.intrinsics.fx - 1100.0).abs() < 30.0);
}

#[test]
fn pnp_under_estimated_camera_matches_calibrated_pose() {
    let views: Vec<Keyframe> = poses().iter().map(|p| keyframe(p, 3)).collect();
    let guess = PinholeCamera::default_for_image(IMAGE, 1000.0);
    let out = BundleCalibrator::default()
        .calibrate_camera(&views, IMAGE, &CalibrationFlags::all_free(), &guess)
        .expect("calibration");

    let pose = PlanarPnp::default()
        .solve_pnp(views[1].object_points(), views[1].image_points(), &out.camera)
        .expect("pnp");
    assert!((pose.tvec - out.poses[1].tvec).norm() < 1.0);
}
