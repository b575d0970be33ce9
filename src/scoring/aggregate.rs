//! Reduction of score records across window widths and chunks

use super::{Metric, ScoreRecord};
use crate::error::ErgoError;
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reducer applied to a list of scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    #[default]
    Median,
    Average,
    Max,
    /// Keep the raw values in chunk order
    KeepSeparate,
}

impl Reducer {
    /// Reduce `values` to an aggregate; `None` when there is nothing to reduce
    pub fn reduce(&self, values: Vec<f64>) -> Option<Aggregate> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Median => stats::median(&values).map(Aggregate::Value),
            Reducer::Average => stats::mean(&values).map(Aggregate::Value),
            Reducer::Max => stats::max(&values).map(Aggregate::Value),
            Reducer::KeepSeparate => Some(Aggregate::Values(values)),
        }
    }
}

/// Aggregated value of one metric component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aggregate {
    Value(f64),
    Values(Vec<f64>),
}

/// Score component within a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Yaw,
    Pitch,
    Roll,
    Total,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Yaw,
        Component::Pitch,
        Component::Roll,
        Component::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Yaw => "yaw",
            Component::Pitch => "pitch",
            Component::Roll => "roll",
            Component::Total => "total",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Across window widths within a chunk
    pub width_reducer: Reducer,
    /// Across chunks
    pub chunk_reducer: Reducer,
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        if self.width_reducer == Reducer::KeepSeparate {
            return Err(ErgoError::Config(
                "width_reducer must reduce to a single value (median, average or max)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregated scores: `{metric: {component: value}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedScores {
    values: BTreeMap<Metric, BTreeMap<Component, Option<Aggregate>>>,
}

impl AggregatedScores {
    pub fn get(&self, metric: Metric, component: Component) -> Option<&Aggregate> {
        self.values.get(&metric)?.get(&component)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, Component, Option<&Aggregate>)> + '_ {
        self.values.iter().flat_map(|(metric, components)| {
            components
                .iter()
                .map(move |(component, value)| (*metric, *component, value.as_ref()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply `f` to every aggregated number
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> AggregatedScores {
        let values = self
            .values
            .iter()
            .map(|(metric, components)| {
                let components = components
                    .iter()
                    .map(|(component, value)| {
                        let value = value.as_ref().map(|agg| match agg {
                            Aggregate::Value(v) => Aggregate::Value(f(*v)),
                            Aggregate::Values(vs) => {
                                Aggregate::Values(vs.iter().map(|v| f(*v)).collect())
                            }
                        });
                        (*component, value)
                    })
                    .collect();
                (*metric, components)
            })
            .collect();
        AggregatedScores { values }
    }
}

/// Reduce each metric component across widths, then across chunks.
///
/// Missing chunk scores are excluded; a component with no values left is `None`.
pub fn aggregate(
    record: &ScoreRecord,
    config: &AggregationConfig,
) -> Result<AggregatedScores, ErgoError> {
    config.validate()?;
    let mut values = BTreeMap::new();

    for metric in record.metrics() {
        let Some(chunks) = record.metric(metric) else {
            continue;
        };
        let mut components = BTreeMap::new();
        for component in Component::ALL {
            let per_chunk: Vec<f64> = chunks
                .values()
                .filter_map(|widths| {
                    let across: Vec<f64> = widths
                        .values()
                        .filter_map(|scores| scores.as_ref()?.component(component))
                        .collect();
                    match config.width_reducer.reduce(across)? {
                        Aggregate::Value(v) => Some(v),
                        Aggregate::Values(_) => None,
                    }
                })
                .collect();
            components.insert(component, config.chunk_reducer.reduce(per_chunk));
        }
        values.insert(metric, components);
    }

    Ok(AggregatedScores { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{AxisCombine, AxisScores, GLOBAL_WIDTH};
    use pretty_assertions::assert_eq;

    fn scores(v: f64) -> Option<AxisScores> {
        Some(AxisScores::new([v, v, v], AxisCombine::Max))
    }

    fn record() -> ScoreRecord {
        let mut record = ScoreRecord::new();
        // chunk 0: widths 2, 3 -> median 2.0
        record.insert(Metric::Activity, 0, 2, scores(1.0));
        record.insert(Metric::Activity, 0, 3, scores(3.0));
        // chunk 1: single width
        record.insert(Metric::Activity, 1, 2, scores(6.0));
        // chunk 2: missing input
        record.insert(Metric::Activity, 2, 2, None);
        record
    }

    fn config(chunk_reducer: Reducer) -> AggregationConfig {
        AggregationConfig {
            width_reducer: Reducer::Median,
            chunk_reducer,
        }
    }

    #[test]
    fn test_reducers_across_chunks() {
        let record = record();
        let cases = [
            (Reducer::Median, Aggregate::Value(4.0)),
            (Reducer::Average, Aggregate::Value(4.0)),
            (Reducer::Max, Aggregate::Value(6.0)),
            (Reducer::KeepSeparate, Aggregate::Values(vec![2.0, 6.0])),
        ];
        for (reducer, expected) in cases {
            let agg = aggregate(&record, &config(reducer)).unwrap();
            assert_eq!(agg.get(Metric::Activity, Component::Yaw), Some(&expected));
            assert_eq!(agg.get(Metric::Activity, Component::Total), Some(&expected));
        }
    }

    #[test]
    fn test_single_chunk() {
        let mut record = ScoreRecord::new();
        record.insert(Metric::Strain, 0, GLOBAL_WIDTH, scores(0.5));
        for reducer in [Reducer::Median, Reducer::Average, Reducer::Max] {
            let agg = aggregate(&record, &config(reducer)).unwrap();
            assert_eq!(agg.get(Metric::Strain, Component::Roll), Some(&Aggregate::Value(0.5)));
        }
    }

    #[test]
    fn test_all_missing_is_none() {
        let mut record = ScoreRecord::new();
        record.insert(Metric::Posture, 0, 2, None);
        record.insert(Metric::Posture, 1, 2, None);
        let agg = aggregate(&record, &AggregationConfig::default()).unwrap();
        assert_eq!(agg.get(Metric::Posture, Component::Yaw), None);
        assert_eq!(agg.iter().count(), 4);
    }

    #[test]
    fn test_separate_totals_are_none() {
        let mut record = ScoreRecord::new();
        record.insert(
            Metric::Posture,
            0,
            2,
            Some(AxisScores::new([1.0, 2.0, 3.0], AxisCombine::Separate)),
        );
        let agg = aggregate(&record, &AggregationConfig::default()).unwrap();
        assert_eq!(agg.get(Metric::Posture, Component::Pitch), Some(&Aggregate::Value(2.0)));
        assert_eq!(agg.get(Metric::Posture, Component::Total), None);
    }

    #[test]
    fn test_width_reducer_cannot_keep_separate() {
        let config = AggregationConfig {
            width_reducer: Reducer::KeepSeparate,
            chunk_reducer: Reducer::Median,
        };
        assert!(matches!(aggregate(&record(), &config), Err(ErgoError::Config(_))));
    }

    #[test]
    fn test_untagged_serialization() {
        let json = serde_json::to_value(Aggregate::Values(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, serde_json::json!([1.0, 2.0]));
        let json = serde_json::to_value(Aggregate::Value(1.5)).unwrap();
        assert_eq!(json, serde_json::json!(1.5));
    }
}
