//! Binned-weight scoring primitives and scale normalization

use crate::error::ErgoError;
use serde::{Deserialize, Serialize};

/// Per-bin weighting applied by [`custom_weighted_sum`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeighingMethod {
    /// Weight 1 for every bin
    #[default]
    Constant,
    /// Weight `index + 1`
    Linear,
    /// Weight `(index + 1)^2`
    Quadratic,
}

impl WeighingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeighingMethod::Constant => "constant",
            WeighingMethod::Linear => "linear",
            WeighingMethod::Quadratic => "quadratic",
        }
    }

    fn weight(&self, index: usize) -> f64 {
        let rank = (index + 1) as f64;
        match self {
            WeighingMethod::Constant => 1.0,
            WeighingMethod::Linear => rank,
            WeighingMethod::Quadratic => rank * rank,
        }
    }
}

impl std::str::FromStr for WeighingMethod {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(WeighingMethod::Constant),
            "linear" => Ok(WeighingMethod::Linear),
            "quadratic" => Ok(WeighingMethod::Quadratic),
            other => Err(ErgoError::Config(format!("unknown weighing method '{other}'"))),
        }
    }
}

/// Weighted mean bin index of a histogram.
///
/// `counts` may be raw counts or fractions; only their proportions matter.
/// An empty or all-zero histogram scores 0.
pub fn custom_weighted_sum(counts: &[f64], method: WeighingMethod) -> f64 {
    let (numerator, denominator) = counts.iter().enumerate().fold(
        (0.0, 0.0),
        |(num, den), (i, &count)| {
            let w = count * method.weight(i);
            (num + w * i as f64, den + w)
        },
    );
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Check that breakpoints are non-empty and strictly increasing
pub fn validate_breakpoints(breakpoints: &[f64]) -> Result<(), ErgoError> {
    if breakpoints.is_empty() {
        return Err(ErgoError::Config("breakpoints must not be empty".to_string()));
    }
    if breakpoints.iter().any(|b| !b.is_finite() || *b < 0.0) {
        return Err(ErgoError::Config(
            "breakpoints must be finite and non-negative".to_string(),
        ));
    }
    if breakpoints.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ErgoError::Config(
            "breakpoints must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Occupancy histogram of `|value|` over right-inclusive bins.
///
/// Bin `i` holds values in `(b[i-1], b[i]]`, with bin 0 being `[0, b[0]]`.
/// `NaN` samples are skipped; values above the last breakpoint are rejected.
pub fn histogram(values: &[f64], breakpoints: &[f64]) -> Result<Vec<f64>, ErgoError> {
    validate_breakpoints(breakpoints)?;
    let hi = breakpoints[breakpoints.len() - 1];
    let mut counts = vec![0.0; breakpoints.len()];

    for value in values.iter().filter(|v| !v.is_nan()).map(|v| v.abs()) {
        if value > hi {
            return Err(ErgoError::OutOfRange { value, lo: 0.0, hi });
        }
        let bin = breakpoints.partition_point(|b| *b < value);
        counts[bin] += 1.0;
    }
    Ok(counts)
}

/// Binned-weight score of `values`, in `[0, breakpoints.len() - 1]`
pub fn binned_weight_score(
    values: &[f64],
    breakpoints: &[f64],
    method: WeighingMethod,
) -> Result<f64, ErgoError> {
    let counts = histogram(values, breakpoints)?;
    let total: f64 = counts.iter().sum();
    if total == 0.0 {
        return Ok(0.0);
    }
    let fractions: Vec<f64> = counts.iter().map(|c| c / total).collect();
    Ok(custom_weighted_sum(&fractions, method))
}

/// Affine remap of a single value from `[old_lo, old_hi]` to `[new_lo, new_hi]`.
///
/// A degenerate old range maps everything to `new_lo`.
pub fn rescale(value: f64, old_lo: f64, old_hi: f64, new_lo: f64, new_hi: f64) -> f64 {
    let span = old_hi - old_lo;
    if span == 0.0 {
        return new_lo;
    }
    (value - old_lo) / span * (new_hi - new_lo) + new_lo
}

/// Affine remap of a whole series; `None` passes through
pub fn normalize_to_scale(
    values: Option<&[f64]>,
    old_lo: f64,
    old_hi: f64,
    new_lo: f64,
    new_hi: f64,
) -> Option<Vec<f64>> {
    values.map(|values| {
        values
            .iter()
            .map(|&v| rescale(v, old_lo, old_hi, new_lo, new_hi))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_two_breakpoint_scenario() {
        let score =
            binned_weight_score(&[0.0, 0.0, 15.0], &[10.0, 20.0], WeighingMethod::Constant)
                .unwrap();
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_three_breakpoint_scenario() {
        let score = binned_weight_score(
            &[0.0, 15.0, 25.0, 0.0],
            &[10.0, 20.0, 40.0],
            WeighingMethod::Constant,
        )
        .unwrap();
        assert!((score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_sum_endpoints() {
        for n in [1.0, 7.0, 250.0] {
            assert_eq!(custom_weighted_sum(&[n, 0.0, 0.0, 0.0], WeighingMethod::Constant), 0.0);
            assert_eq!(custom_weighted_sum(&[0.0, 0.0, 0.0, n], WeighingMethod::Constant), 3.0);
        }
        assert_eq!(custom_weighted_sum(&[], WeighingMethod::Linear), 0.0);
        assert_eq!(custom_weighted_sum(&[0.0, 0.0], WeighingMethod::Quadratic), 0.0);
    }

    #[test]
    fn test_weighting_shifts_towards_high_bins() {
        let counts = [1.0, 1.0];
        let constant = custom_weighted_sum(&counts, WeighingMethod::Constant);
        let linear = custom_weighted_sum(&counts, WeighingMethod::Linear);
        let quadratic = custom_weighted_sum(&counts, WeighingMethod::Quadratic);
        assert_eq!(constant, 0.5);
        assert!((linear - 2.0 / 3.0).abs() < 1e-12);
        assert!((quadratic - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_bins_are_right_inclusive() {
        let counts = histogram(&[0.0, 10.0, 10.5, -20.0, f64::NAN], &[10.0, 20.0]).unwrap();
        assert_eq!(counts, vec![2.0, 2.0]);
    }

    #[test]
    fn test_out_of_range_value_rejected() {
        let result = binned_weight_score(&[5.0, 25.0], &[10.0, 20.0], WeighingMethod::Constant);
        assert!(matches!(result, Err(ErgoError::OutOfRange { value, .. }) if value == 25.0));
    }

    #[test]
    fn test_invalid_breakpoints_rejected() {
        assert!(matches!(histogram(&[1.0], &[]), Err(ErgoError::Config(_))));
        assert!(matches!(histogram(&[1.0], &[10.0, 10.0]), Err(ErgoError::Config(_))));
    }

    #[test]
    fn test_unknown_weighing_method() {
        assert_eq!("linear".parse::<WeighingMethod>().unwrap(), WeighingMethod::Linear);
        assert!(matches!("cubic".parse::<WeighingMethod>(), Err(ErgoError::Config(_))));
    }

    #[test]
    fn test_normalize_identity_and_edges() {
        let values = [0.0, 0.25, 3.5, 7.0];
        let same = normalize_to_scale(Some(&values), 0.0, 7.0, 0.0, 7.0).unwrap();
        for (a, b) in same.iter().zip(values) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(normalize_to_scale(Some(&[]), 0.0, 1.0, 0.0, 7.0), Some(vec![]));
        assert_eq!(normalize_to_scale(None, 0.0, 1.0, 0.0, 7.0), None);
        assert_eq!(
            normalize_to_scale(Some(&[0.5, 1.0]), 0.0, 1.0, 0.0, 7.0),
            Some(vec![3.5, 7.0])
        );
    }

    #[test]
    fn test_degenerate_range_maps_to_lower_bound() {
        assert_eq!(rescale(4.0, 2.0, 2.0, 1.0, 7.0), 1.0);
    }
}
