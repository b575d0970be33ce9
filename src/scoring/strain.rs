//! Strain score
//!
//! Global (not windowed) binned-weight score of each delta-angle series over
//! `bin_width`-degree bins up to `max_angle`, scaled by `adjuster / num_bins`
//! and divided by `normalizer`. The defaults are empirically tuned.

use super::binning::{binned_weight_score, WeighingMethod};
use super::AxisScores;
use crate::error::ErgoError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainConfig {
    pub enabled: bool,
    pub bin_width: f64,
    pub max_angle: f64,
    pub weighing: WeighingMethod,
    /// Numerator of the per-axis adjuster (`adjuster / num_bins`)
    pub adjuster: f64,
    pub normalizer: f64,
    /// `total = (yaw + pitch + roll) / total_divisor`
    pub total_divisor: f64,
}

impl Default for StrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bin_width: 15.0,
            max_angle: 180.0,
            weighing: WeighingMethod::Linear,
            adjuster: 1200.0,
            normalizer: 2214.0,
            total_divisor: 2.0,
        }
    }
}

impl StrainConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        if !(self.bin_width > 0.0) || !(self.max_angle >= self.bin_width) {
            return Err(ErgoError::Config(format!(
                "strain: need 0 < bin_width <= max_angle, got {} and {}",
                self.bin_width, self.max_angle
            )));
        }
        let bins = self.max_angle / self.bin_width;
        if (bins - bins.round()).abs() > 1e-9 {
            return Err(ErgoError::Config(format!(
                "strain: max_angle {} is not a multiple of bin_width {}",
                self.max_angle, self.bin_width
            )));
        }
        if self.normalizer == 0.0 || self.total_divisor == 0.0 {
            return Err(ErgoError::Config(
                "strain: normalizer and total_divisor must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Bin upper edges: `bin_width, 2 * bin_width, ..., max_angle`
    pub fn breakpoints(&self) -> Vec<f64> {
        let bins = (self.max_angle / self.bin_width).round() as usize;
        (1..=bins).map(|k| k as f64 * self.bin_width).collect()
    }
}

/// Strain of one axis; `None` when the axis holds no samples to bin
fn axis_strain(
    values: &[f64],
    breakpoints: &[f64],
    config: &StrainConfig,
) -> Result<Option<f64>, ErgoError> {
    if values.iter().all(|v| v.is_nan()) {
        return Ok(None);
    }
    let raw = binned_weight_score(values, breakpoints, config.weighing)?;
    let adjuster = config.adjuster / breakpoints.len() as f64;
    Ok(Some(raw * adjuster / config.normalizer))
}

/// Strain scores for one chunk; `None` if any axis is missing or empty
pub fn strain_score(
    deltas: [Option<&[f64]>; 3],
    config: &StrainConfig,
) -> Result<Option<AxisScores>, ErgoError> {
    let [Some(yaw), Some(pitch), Some(roll)] = deltas else {
        return Ok(None);
    };
    let breakpoints = config.breakpoints();
    let axes = match (
        axis_strain(yaw, &breakpoints, config)?,
        axis_strain(pitch, &breakpoints, config)?,
        axis_strain(roll, &breakpoints, config)?,
    ) {
        (Some(y), Some(p), Some(r)) => [y, p, r],
        _ => return Ok(None),
    };
    Ok(Some(AxisScores {
        yaw: axes[0],
        pitch: axes[1],
        roll: axes[2],
        total: Some(axes.iter().sum::<f64>() / config.total_divisor),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_breakpoints() {
        let bps = StrainConfig::default().breakpoints();
        assert_eq!(bps.len(), 12);
        assert_eq!(bps[0], 15.0);
        assert_eq!(bps[11], 180.0);
    }

    #[test]
    fn test_all_zero_deltas_score_zero() {
        let zeros = vec![0.0; 5];
        let scores = strain_score([Some(zeros.as_slice()); 3], &StrainConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(
            scores,
            AxisScores {
                yaw: 0.0,
                pitch: 0.0,
                roll: 0.0,
                total: Some(0.0),
            }
        );
    }

    #[test]
    fn test_single_bin_scaling() {
        let config = StrainConfig::default();
        // Every sample in bin 1 (15, 30]: raw score 1, adjuster 1200 / 12 = 100
        let values = vec![20.0; 4];
        let zeros = vec![0.0; 4];
        let scores = strain_score(
            [Some(values.as_slice()), Some(zeros.as_slice()), Some(values.as_slice())],
            &config,
        )
        .unwrap()
        .unwrap();
        let expected = 100.0 / 2214.0;
        assert!((scores.yaw - expected).abs() < 1e-12);
        assert_eq!(scores.pitch, 0.0);
        assert!((scores.total.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_is_fatal() {
        let values = vec![200.0];
        let result = strain_score([Some(values.as_slice()); 3], &StrainConfig::default());
        assert!(matches!(result, Err(ErgoError::OutOfRange { .. })));
    }

    #[test]
    fn test_missing_axis_gives_none() {
        let values = vec![0.0];
        let result = strain_score(
            [Some(values.as_slice()), Some(values.as_slice()), None],
            &StrainConfig::default(),
        );
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_axis_without_samples_gives_none() {
        let config = StrainConfig::default();
        let zeros = vec![0.0; 4];
        let gaps = vec![f64::NAN; 4];
        let empty: Vec<f64> = Vec::new();

        let all_nan = strain_score(
            [Some(gaps.as_slice()), Some(zeros.as_slice()), Some(zeros.as_slice())],
            &config,
        );
        assert_eq!(all_nan.unwrap(), None);
        assert_eq!(strain_score([Some(empty.as_slice()); 3], &config).unwrap(), None);
    }

    #[test]
    fn test_bin_width_must_divide_range() {
        let config = StrainConfig {
            bin_width: 50.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        StrainConfig::default().validate().unwrap();
    }
}
