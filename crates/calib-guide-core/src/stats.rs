//! Small statistics helpers.

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; NaN for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    if !m.is_finite() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Index of dispersion `var / max(|mean|, 1)`.
///
/// A NaN mean falls back to a denominator of one.
#[inline]
pub fn index_of_dispersion(mean: f64, variance: f64) -> f64 {
    variance / mean.abs().max(1.0)
}

/// Element-wise [`index_of_dispersion`].
pub fn index_of_dispersion_all<const N: usize>(mean: &[f64; N], variance: &[f64; N]) -> [f64; N] {
    std::array::from_fn(|i| index_of_dispersion(mean[i], variance[i]))
}

/// Index of the largest finite value. NaN entries are ignored.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Index of the smallest value. NaN entries are ignored.
pub fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispersion_divides_by_large_means_only() {
        assert_eq!(index_of_dispersion(1000.0, 50.0), 0.05);
        assert_eq!(index_of_dispersion(-4.0, 2.0), 0.5);
        assert_eq!(index_of_dispersion(0.0, 0.3), 0.3);
        assert_eq!(index_of_dispersion(0.2, 0.3), 0.3);
    }

    #[test]
    fn dispersion_with_nan_mean_uses_variance() {
        assert_eq!(index_of_dispersion(f64::NAN, 0.7), 0.7);
        assert!(index_of_dispersion(f64::NAN, f64::NAN).is_nan());
    }

    #[test]
    fn population_variance() {
        assert_eq!(variance(&[1.0, 3.0]), 1.0);
        assert_eq!(variance(&[5.0]), 0.0);
        assert!(variance(&[]).is_nan());
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f64::NAN, 2.0, 1.0]), Some(1));
        assert_eq!(argmax(&[f64::NAN]), None);
        assert_eq!(argmin(&[3.0, f64::NAN, -1.0]), Some(2));
    }
}
