//! Windowed ergonomic scoring
//!
//! Converts the delta-angle series of each chunk into bounded risk scores:
//! - Activity/Speed: binned angular speed per window width
//! - Posture: fraction of time beyond a threshold around the window's zero line
//! - Strain: global binned-weight score over 15 degree bins
//!
//! Scores are collected per `(metric, chunk, width)` in a [`ScoreRecord`] and
//! reduced by [`aggregate`](aggregate::aggregate).

pub mod activity;
pub mod aggregate;
pub mod binning;
pub mod engine;
pub mod posture;
pub mod strain;

pub use activity::ActivityConfig;
pub use aggregate::{aggregate, Aggregate, AggregatedScores, AggregationConfig, Component, Reducer};
pub use binning::{
    binned_weight_score, custom_weighted_sum, normalize_to_scale, rescale, WeighingMethod,
};
pub use engine::ScoringEngine;
pub use posture::PostureConfig;
pub use strain::StrainConfig;

use crate::error::ErgoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Width key for scores that are not windowed (strain)
pub const GLOBAL_WIDTH: usize = 0;

/// Score family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Activity,
    Posture,
    Strain,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Activity, Metric::Posture, Metric::Strain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Activity => "activity",
            Metric::Posture => "posture",
            Metric::Strain => "strain",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the three per-axis scores fold into a total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisCombine {
    /// Worst axis dominates
    Max,
    Mean,
    Sum,
    /// No total; axes are reported individually
    Separate,
}

impl AxisCombine {
    pub fn combine(&self, axes: [f64; 3]) -> Option<f64> {
        let [yaw, pitch, roll] = axes;
        match self {
            AxisCombine::Max => Some(yaw.max(pitch).max(roll)),
            AxisCombine::Mean => Some((yaw + pitch + roll) / 3.0),
            AxisCombine::Sum => Some(yaw + pitch + roll),
            AxisCombine::Separate => None,
        }
    }
}

/// Scores for one metric, chunk and width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub total: Option<f64>,
}

impl AxisScores {
    pub fn new(axes: [f64; 3], combine: AxisCombine) -> Self {
        Self {
            yaw: axes[0],
            pitch: axes[1],
            roll: axes[2],
            total: combine.combine(axes),
        }
    }

    pub fn component(&self, component: Component) -> Option<f64> {
        match component {
            Component::Yaw => Some(self.yaw),
            Component::Pitch => Some(self.pitch),
            Component::Roll => Some(self.roll),
            Component::Total => self.total,
        }
    }
}

/// `{metric: {chunk: {width: scores}}}`; `None` marks a chunk missing input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreRecord {
    scores: BTreeMap<Metric, BTreeMap<usize, BTreeMap<usize, Option<AxisScores>>>>,
}

impl ScoreRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        metric: Metric,
        chunk: usize,
        width: usize,
        scores: Option<AxisScores>,
    ) {
        self.scores
            .entry(metric)
            .or_default()
            .entry(chunk)
            .or_default()
            .insert(width, scores);
    }

    /// Outer `None`: nothing recorded; inner `None`: recorded as missing
    pub fn get(&self, metric: Metric, chunk: usize, width: usize) -> Option<Option<AxisScores>> {
        self.scores.get(&metric)?.get(&chunk)?.get(&width).copied()
    }

    /// Per-chunk, per-width scores of one metric
    pub fn metric(
        &self,
        metric: Metric,
    ) -> Option<&BTreeMap<usize, BTreeMap<usize, Option<AxisScores>>>> {
        self.scores.get(&metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.scores.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub activity: ActivityConfig,
    pub posture: PostureConfig,
    pub strain: StrainConfig,
    pub aggregation: AggregationConfig,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        self.activity.validate()?;
        self.posture.validate()?;
        self.strain.validate()?;
        self.aggregation.validate()
    }
}

/// Reject empty or zero window widths
pub(crate) fn validate_widths(metric: Metric, widths: &[usize]) -> Result<(), ErgoError> {
    if widths.is_empty() {
        return Err(ErgoError::Config(format!("{metric}: at least one window width is required")));
    }
    if widths.contains(&0) {
        return Err(ErgoError::Config(format!("{metric}: window widths must be positive")));
    }
    Ok(())
}

/// Non-overlapping full windows of `width` samples (`start = ix * width`)
pub(crate) fn windows(values: &[f64], width: usize) -> impl Iterator<Item = &[f64]> {
    values.chunks_exact(width.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_axis_combine() {
        let axes = [1.0, 4.0, 1.0];
        assert_eq!(AxisCombine::Max.combine(axes), Some(4.0));
        assert_eq!(AxisCombine::Mean.combine(axes), Some(2.0));
        assert_eq!(AxisCombine::Sum.combine(axes), Some(6.0));
        assert_eq!(AxisCombine::Separate.combine(axes), None);
    }

    #[test]
    fn test_score_record_lookup() {
        let mut record = ScoreRecord::new();
        let scores = AxisScores::new([1.0, 2.0, 3.0], AxisCombine::Sum);
        record.insert(Metric::Activity, 0, 2, Some(scores));
        record.insert(Metric::Activity, 1, 2, None);

        assert_eq!(record.get(Metric::Activity, 0, 2), Some(Some(scores)));
        assert_eq!(record.get(Metric::Activity, 1, 2), Some(None));
        assert_eq!(record.get(Metric::Activity, 0, 3), None);
        assert_eq!(record.get(Metric::Strain, 0, GLOBAL_WIDTH), None);
        assert_eq!(record.metrics().collect::<Vec<_>>(), vec![Metric::Activity]);
    }

    #[test]
    fn test_score_record_serializes_nested_maps() {
        let mut record = ScoreRecord::new();
        record.insert(Metric::Strain, 0, GLOBAL_WIDTH, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"strain": {"0": {"0": null}}}));
    }

    #[test]
    fn test_windows_drop_partial_tail() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let got: Vec<&[f64]> = windows(&values, 2).collect();
        assert_eq!(got, vec![&[1.0, 2.0][..], &[3.0, 4.0][..]]);
    }

    #[test]
    fn test_default_config_is_valid() {
        ScoringConfig::default().validate().unwrap();
    }
}
