//! Posture score
//!
//! Each window is centered on its own percentile (median by default) and the
//! share of samples further than `threshold` degrees from that line is taken.
//! Window shares are averaged and rescaled from `[0, 1]` to `[0, 7]`.

use super::binning::rescale;
use super::{validate_widths, windows, AxisCombine, AxisScores, Metric};
use crate::error::ErgoError;
use crate::stats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    pub enabled: bool,
    pub widths: Vec<usize>,
    /// Degrees from the window's zero line counted as awkward posture
    pub threshold: f64,
    pub percentile: f64,
    pub scale_max: f64,
    pub combine: AxisCombine,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            widths: (2..=10).collect(),
            threshold: 30.0,
            percentile: 50.0,
            scale_max: 7.0,
            combine: AxisCombine::Max,
        }
    }
}

impl PostureConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        validate_widths(Metric::Posture, &self.widths)?;
        if !(self.threshold >= 0.0) {
            return Err(ErgoError::Config(
                "posture: threshold must be non-negative".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ErgoError::Config(format!(
                "posture: percentile must be in [0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

/// Fraction of finite samples beyond `threshold` after centering on `percentile`
pub fn fraction_beyond(window: &[f64], threshold: f64, percentile: f64) -> Option<f64> {
    let zero = stats::percentile(window, percentile)?;
    let (beyond, total) = window
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0usize, 0usize), |(b, t), v| {
            (b + usize::from((v - zero).abs() > threshold), t + 1)
        });
    Some(beyond as f64 / total as f64)
}

/// Posture score of one axis at one width; `None` when no window has data
pub fn axis_posture(values: &[f64], width: usize, config: &PostureConfig) -> Option<f64> {
    let fractions: Vec<f64> = windows(values, width)
        .filter_map(|w| fraction_beyond(w, config.threshold, config.percentile))
        .collect();
    let average = stats::mean(&fractions)?;
    Some(rescale(average, 0.0, 1.0, 0.0, config.scale_max))
}

/// Posture scores for one chunk at one width; `None` if any axis is missing
pub fn posture_score(
    deltas: [Option<&[f64]>; 3],
    width: usize,
    config: &PostureConfig,
) -> Result<Option<AxisScores>, ErgoError> {
    let [Some(yaw), Some(pitch), Some(roll)] = deltas else {
        return Ok(None);
    };
    let axes = match (
        axis_posture(yaw, width, config),
        axis_posture(pitch, width, config),
        axis_posture(roll, width, config),
    ) {
        (Some(y), Some(p), Some(r)) => [y, p, r],
        _ => return Ok(None),
    };
    Ok(Some(AxisScores::new(axes, config.combine)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_within_threshold_is_exactly_zero() {
        let window = [100.0, 110.0, 120.0, 95.0, 125.0];
        assert_eq!(fraction_beyond(&window, 30.0, 50.0), Some(0.0));
    }

    #[test]
    fn test_fraction_beyond_counts_both_sides() {
        // Median 0: -40 and 50 are beyond 30 degrees
        let window = [-40.0, -5.0, 0.0, 5.0, 50.0];
        assert_eq!(fraction_beyond(&window, 30.0, 50.0), Some(0.4));
        assert_eq!(fraction_beyond(&[f64::NAN], 30.0, 50.0), None);
    }

    #[test]
    fn test_axis_posture_averages_windows() {
        let config = PostureConfig::default();
        // First window all beyond after centering on 0; second window flat
        let values = [-60.0, 0.0, 60.0, 0.0, 0.0, 0.0];
        let score = axis_posture(&values, 3, &config).unwrap();
        // (2/3 + 0) / 2 scaled to 7
        assert!((score - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_combine_by_worst_axis() {
        let config = PostureConfig::default();
        let calm = vec![0.0; 4];
        let awkward = vec![-90.0, 90.0, -90.0, 90.0];
        let scores = posture_score(
            [Some(calm.as_slice()), Some(awkward.as_slice()), Some(calm.as_slice())],
            4,
            &config,
        )
        .unwrap()
        .unwrap();
        assert_eq!(scores.yaw, 0.0);
        assert_eq!(scores.pitch, 7.0);
        assert_eq!(scores.total, Some(7.0));
    }

    #[test]
    fn test_short_or_missing_series() {
        let config = PostureConfig::default();
        let values = vec![0.0; 2];
        let short = posture_score([Some(values.as_slice()); 3], 5, &config).unwrap();
        assert_eq!(short, None);
        let missing = posture_score([None, Some(values.as_slice()), None], 2, &config).unwrap();
        assert_eq!(missing, None);
    }
}
