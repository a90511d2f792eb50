//! Per-parameter convergence bookkeeping.

use calib_guide_core::INTRINSIC_COUNT;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Intrinsic parameters in `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntrinsicParam {
    Fx = 0,
    Fy = 1,
    Cx = 2,
    Cy = 3,
    K1 = 4,
    K2 = 5,
    P1 = 6,
    P2 = 7,
    K3 = 8,
}

impl IntrinsicParam {
    pub const ALL: [IntrinsicParam; INTRINSIC_COUNT] = [
        IntrinsicParam::Fx,
        IntrinsicParam::Fy,
        IntrinsicParam::Cx,
        IntrinsicParam::Cy,
        IntrinsicParam::K1,
        IntrinsicParam::K2,
        IntrinsicParam::P1,
        IntrinsicParam::P2,
        IntrinsicParam::K3,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            IntrinsicParam::Fx => "fx",
            IntrinsicParam::Fy => "fy",
            IntrinsicParam::Cx => "cx",
            IntrinsicParam::Cy => "cy",
            IntrinsicParam::K1 => "k1",
            IntrinsicParam::K2 => "k2",
            IntrinsicParam::P1 => "p1",
            IntrinsicParam::P2 => "p2",
            IntrinsicParam::K3 => "k3",
        }
    }

    /// Projection parameters (`fx..cy`) as opposed to distortion.
    #[inline]
    pub fn is_projection(self) -> bool {
        self.index() < 4
    }

    /// The convergence group this parameter belongs to.
    pub fn group(self) -> &'static [IntrinsicParam] {
        PARAM_GROUPS
            .iter()
            .find(|g| g.contains(&self))
            .copied()
            .unwrap_or(&[])
    }
}

impl fmt::Display for IntrinsicParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters judged together: projection, then distortion.
pub const PARAM_GROUPS: [&[IntrinsicParam]; 2] = [
    &[
        IntrinsicParam::Fx,
        IntrinsicParam::Fy,
        IntrinsicParam::Cx,
        IntrinsicParam::Cy,
    ],
    &[
        IntrinsicParam::K1,
        IntrinsicParam::K2,
        IntrinsicParam::P1,
        IntrinsicParam::P2,
        IntrinsicParam::K3,
    ],
];

/// Monotonic set of converged parameters.
///
/// Flags are only ever added during a session; [`ConvergenceFlags::reset`]
/// is reserved for starting a new session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceFlags {
    bits: u16,
}

impl ConvergenceFlags {
    const ALL_BITS: u16 = (1 << INTRINSIC_COUNT) - 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `param` converged. Returns `true` if it was not set before.
    pub fn mark(&mut self, param: IntrinsicParam) -> bool {
        let bit = 1 << param.index();
        let fresh = self.bits & bit == 0;
        self.bits |= bit;
        fresh
    }

    #[inline]
    pub fn is_converged(&self, param: IntrinsicParam) -> bool {
        self.bits & (1 << param.index()) != 0
    }

    #[inline]
    pub fn all(&self) -> bool {
        self.bits == Self::ALL_BITS
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Converged parameters in index order.
    pub fn converged(&self) -> Vec<IntrinsicParam> {
        IntrinsicParam::ALL
            .into_iter()
            .filter(|p| self.is_converged(*p))
            .collect()
    }

    pub fn as_array(&self) -> [bool; INTRINSIC_COUNT] {
        IntrinsicParam::ALL.map(|p| self.is_converged(p))
    }

    /// Clear all flags. Only for session start.
    pub fn reset(&mut self) {
        self.bits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_only_grow() {
        let mut flags = ConvergenceFlags::new();
        let mut seen = 0;
        for p in [
            IntrinsicParam::Fx,
            IntrinsicParam::K2,
            IntrinsicParam::Fx,
            IntrinsicParam::Cy,
        ] {
            flags.mark(p);
            assert!(flags.count() >= seen);
            seen = flags.count();
            assert!(flags.is_converged(p));
        }
        assert_eq!(seen, 3);
        assert!(!flags.mark(IntrinsicParam::Fx));
        assert!(!flags.all());
    }

    #[test]
    fn all_flags_means_converged() {
        let mut flags = ConvergenceFlags::new();
        for p in IntrinsicParam::ALL {
            flags.mark(p);
        }
        assert!(flags.all());
        flags.reset();
        assert_eq!(flags.count(), 0);
    }

    #[test]
    fn groups_partition_parameters() {
        assert_eq!(IntrinsicParam::Cx.group().len(), 4);
        assert_eq!(IntrinsicParam::P2.group().len(), 5);
        let total: usize = PARAM_GROUPS.iter().map(|g| g.len()).sum();
        assert_eq!(total, INTRINSIC_COUNT);
    }
}
