//! Activity/Speed score
//!
//! Per window the angular speed is `|max - min| / width`. Speeds are binned
//! into `[0, 1, ..., 10, 180]` and the binned-weight score is rescaled to `[0, 7]`.

use super::binning::{binned_weight_score, rescale, validate_breakpoints, WeighingMethod};
use super::{validate_widths, windows, AxisCombine, AxisScores, Metric};
use crate::error::ErgoError;
use crate::stats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub enabled: bool,
    /// Window widths in samples
    pub widths: Vec<usize>,
    pub breakpoints: Vec<f64>,
    pub weighing: WeighingMethod,
    /// Upper clip for per-window speed
    pub clip: f64,
    /// Upper bound of the output scale
    pub scale_max: f64,
    pub combine: AxisCombine,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        let mut breakpoints: Vec<f64> = (0..=10).map(f64::from).collect();
        breakpoints.push(180.0);
        Self {
            enabled: true,
            widths: (2..=10).collect(),
            breakpoints,
            weighing: WeighingMethod::Constant,
            clip: 180.0,
            scale_max: 7.0,
            combine: AxisCombine::Mean,
        }
    }
}

impl ActivityConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        validate_widths(Metric::Activity, &self.widths)?;
        validate_breakpoints(&self.breakpoints)?;
        if self.breakpoints.len() < 2 {
            return Err(ErgoError::Config(
                "activity: at least two breakpoints are required".to_string(),
            ));
        }
        if !(self.clip > 0.0) {
            return Err(ErgoError::Config("activity: clip must be positive".to_string()));
        }
        Ok(())
    }
}

/// Speed of each full window, skipping windows without finite samples
pub fn window_speeds(values: &[f64], width: usize, clip: f64) -> Vec<f64> {
    windows(values, width)
        .filter_map(|window| {
            let hi = stats::max(window)?;
            let lo = stats::min(window)?;
            Some(((hi - lo).abs() / width as f64).min(clip))
        })
        .collect()
}

/// Activity score of one axis at one width, in `[0, scale_max]`.
///
/// `None` when no full window holds a finite sample.
pub fn axis_activity(
    values: &[f64],
    width: usize,
    config: &ActivityConfig,
) -> Result<Option<f64>, ErgoError> {
    let speeds = window_speeds(values, width, config.clip);
    if speeds.is_empty() {
        return Ok(None);
    }
    let raw = binned_weight_score(&speeds, &config.breakpoints, config.weighing)?;
    let top = (config.breakpoints.len() - 1) as f64;
    Ok(Some(rescale(raw, 0.0, top, 0.0, config.scale_max)))
}

/// Activity scores for one chunk at one width; `None` if any axis is missing or empty
pub fn activity_score(
    deltas: [Option<&[f64]>; 3],
    width: usize,
    config: &ActivityConfig,
) -> Result<Option<AxisScores>, ErgoError> {
    let [Some(yaw), Some(pitch), Some(roll)] = deltas else {
        return Ok(None);
    };
    let axes = match (
        axis_activity(yaw, width, config)?,
        axis_activity(pitch, width, config)?,
        axis_activity(roll, width, config)?,
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
    fn test_window_speeds() {
        let values = [0.0, 4.0, 10.0, 10.0, 1.0];
        assert_eq!(window_speeds(&values, 2, 180.0), vec![2.0, 0.0]);
        assert_eq!(window_speeds(&values, 2, 1.5), vec![1.5, 0.0]);
        assert!(window_speeds(&values, 6, 180.0).is_empty());
    }

    #[test]
    fn test_still_series_scores_zero() {
        let config = ActivityConfig::default();
        let flat = vec![5.0; 20];
        let scores = activity_score([Some(flat.as_slice()); 3], 2, &config)
            .unwrap()
            .unwrap();
        assert_eq!(scores, AxisScores::new([0.0; 3], AxisCombine::Mean));
    }

    #[test]
    fn test_fast_motion_reaches_top_of_scale() {
        let config = ActivityConfig::default();
        // Alternating 0/100 at width 2 gives 50 deg/sample, the last bin
        let fast: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.0 } else { 100.0 }).collect();
        let score = axis_activity(&fast, 2, &config).unwrap().unwrap();
        assert!((score - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_axis_gives_none() {
        let config = ActivityConfig::default();
        let values = vec![0.0; 4];
        let scores =
            activity_score([Some(values.as_slice()), None, Some(values.as_slice())], 2, &config)
                .unwrap();
        assert_eq!(scores, None);
    }

    #[test]
    fn test_axis_without_samples_gives_none() {
        let config = ActivityConfig::default();
        let still = vec![0.0; 6];
        let gaps = vec![f64::NAN; 6];

        assert_eq!(axis_activity(&gaps, 2, &config).unwrap(), None);
        let deltas = [Some(still.as_slice()), Some(gaps.as_slice()), Some(still.as_slice())];
        assert_eq!(activity_score(deltas, 2, &config).unwrap(), None);
    }
}
