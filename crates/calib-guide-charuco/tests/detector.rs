use calib_guide_charuco::synthetic::{PassthroughDetector, PixelNoise, SyntheticBoardDetector, SyntheticFrame};
use calib_guide_charuco::{
    CharucoBoard, CharucoBoardSpec, CharucoDetector, CharucoDetectorParams, RawBoardDetection,
};
use calib_guide_core::{Distortion, ImageSize, Intrinsics, PinholeCamera, Pose};
use nalgebra::{Point2, Vector3};

fn board() -> CharucoBoard {
    CharucoBoard::new(CharucoBoardSpec::default()).expect("board")
}

fn camera() -> PinholeCamera {
    PinholeCamera::new(
        Intrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 319.5,
            cy: 239.5,
        },
        Distortion::ZERO,
    )
}

fn pose() -> Pose {
    Pose::new(
        Vector3::new(std::f64::consts::PI + 0.2, 0.1, 0.0),
        Vector3::new(-135.0, 90.0, 650.0),
    )
}

fn synthetic_detector() -> CharucoDetector<SyntheticBoardDetector> {
    let backend = SyntheticBoardDetector::new(
        board(),
        camera(),
        ImageSize::new(640, 480),
        PixelNoise::default(),
    );
    CharucoDetector::new(board(), CharucoDetectorParams::default(), backend)
}

#[test]
fn flow_is_infinite_until_the_same_ids_repeat() {
    let mut det = synthetic_detector();
    let frame = SyntheticFrame::new(pose());

    let first = det.detect(&frame);
    assert_eq!(first.n_pts(), 40);
    assert!(first.mean_flow.is_infinite());

    let second = det.detect(&frame);
    assert_eq!(second.mean_flow, 0.0);

    let partial = det.detect(&SyntheticFrame {
        board_pose: Some(pose()),
        max_corners: Some(20),
    });
    assert!(partial.mean_flow.is_infinite());
}

#[test]
fn pose_requires_intrinsics_and_enough_corners() {
    let mut det = synthetic_detector();
    let frame = SyntheticFrame::new(pose());
    assert!(!det.detect(&frame).pose_valid());

    det.set_intrinsics(camera());
    let full = det.detect(&frame);
    let estimated = full.pose.expect("pose");
    assert!((estimated.tvec - pose().tvec).norm() < 1e-6);

    let few = det.detect(&SyntheticFrame {
        board_pose: Some(pose()),
        max_corners: Some(3),
    });
    assert_eq!(few.n_pts(), 3);
    assert!(!few.pose_valid());
    assert!(det.get_calib_pts().is_err());
}

#[test]
fn snapshot_matches_detection() {
    let mut det = synthetic_detector();
    det.detect(&SyntheticFrame::new(pose()));
    let kf = det.get_calib_pts().expect("keyframe");
    assert_eq!(kf.len(), 40);
    assert_eq!(kf.image_points(), det.last().corners.as_slice());
}

#[test]
fn inconsistent_detection_is_skipped() {
    let mut det = CharucoDetector::new(board(), CharucoDetectorParams::default(), PassthroughDetector);
    let raw = RawBoardDetection {
        corners: vec![Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)],
        ids: vec![0],
        marker_ids: vec![0],
        marker_corners: vec![[Point2::origin(); 4]],
    };
    let out = det.detect(&raw);
    assert_eq!(out.n_pts(), 0);
    assert!(!out.pose_valid());
    assert!(out.mean_flow.is_infinite());
}
