//! Captured calibration views.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Minimum number of correspondences in a keyframe.
pub const MIN_CORNERS: usize = 6;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyframeError {
    #[error("image/object point count mismatch ({image} vs {object})")]
    LengthMismatch { image: usize, object: usize },
    #[error("keyframe needs at least {min} corners, got {count}")]
    TooFewPoints { count: usize, min: usize },
    #[error("keyframe contains non-finite coordinates")]
    NonFinite,
}

/// Immutable set of matched image/object points from one accepted frame.
///
/// Invariant: `image_points.len() == object_points.len() >= MIN_CORNERS`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "KeyframeRecord", into = "KeyframeRecord")]
pub struct Keyframe {
    image_points: Vec<Point2<f64>>,
    object_points: Vec<Point3<f64>>,
}

impl Keyframe {
    pub fn new(
        image_points: Vec<Point2<f64>>,
        object_points: Vec<Point3<f64>>,
    ) -> Result<Self, KeyframeError> {
        if image_points.len() != object_points.len() {
            return Err(KeyframeError::LengthMismatch {
                image: image_points.len(),
                object: object_points.len(),
            });
        }
        if image_points.len() < MIN_CORNERS {
            return Err(KeyframeError::TooFewPoints {
                count: image_points.len(),
                min: MIN_CORNERS,
            });
        }
        let finite = image_points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
            && object_points
                .iter()
                .all(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite());
        if !finite {
            return Err(KeyframeError::NonFinite);
        }
        Ok(Self {
            image_points,
            object_points,
        })
    }

    #[inline]
    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.image_points
    }

    #[inline]
    pub fn object_points(&self) -> &[Point3<f64>] {
        &self.object_points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    /// Always false for a constructed keyframe; kept for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// Plain serialized form: `[x, y]` / `[x, y, z]` arrays.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct KeyframeRecord {
    image_points: Vec<[f64; 2]>,
    object_points: Vec<[f64; 3]>,
}

impl TryFrom<KeyframeRecord> for Keyframe {
    type Error = KeyframeError;

    fn try_from(r: KeyframeRecord) -> Result<Self, Self::Error> {
        Keyframe::new(
            r.image_points
                .into_iter()
                .map(|[x, y]| Point2::new(x, y))
                .collect(),
            r.object_points
                .into_iter()
                .map(|[x, y, z]| Point3::new(x, y, z))
                .collect(),
        )
    }
}

impl From<Keyframe> for KeyframeRecord {
    fn from(k: Keyframe) -> Self {
        Self {
            image_points: k.image_points.iter().map(|p| [p.x, p.y]).collect(),
            object_points: k.object_points.iter().map(|p| [p.x, p.y, p.z]).collect(),
        }
    }
}
