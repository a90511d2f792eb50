//! Core types and utilities for guided camera calibration.
//!
//! This crate is intentionally small and purely geometric: images, homographies,
//! the pinhole + Brown–Conrady camera model, poses, keyframes and a few
//! statistics helpers. It does *not* depend on any board detector or solver.

mod camera;
mod homography;
mod image;
mod keyframe;
mod logger;
mod pose;
mod stats;

pub use camera::{Distortion, ImageSize, Intrinsics, PinholeCamera, INTRINSIC_COUNT};
pub use homography::{
    estimate_homography, homography_from_4pt, warp_perspective_gray, Homography, Interpolation,
};
pub use image::{sample_bilinear, sample_bilinear_u8, sample_nearest, GrayImage, GrayImageView};
pub use keyframe::{Keyframe, KeyframeError, MIN_CORNERS};
pub use pose::Pose;
pub use stats::{argmax, argmin, index_of_dispersion, index_of_dispersion_all, mean, variance};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
