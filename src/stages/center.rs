//! Zero-line centering stage
//!
//! The zero line (one percentile per column) is calibrated on the first
//! non-empty chunk and written back into the returned parameters under
//! `zero_line`, so later chunks are centered against the same reference.
//! Setting `recalibrate` recomputes it on every chunk.

use super::{configure, require_columns, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::stats;
use crate::types::{delta_column_names, ChangeDescriptor, Series};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const KIND: StageKind = StageKind::Center;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("columns", json!(delta_column_names()))
        .with("percentile", 50.0)
        .with("recalibrate", false)
        .with("zero_line", Value::Null)
}

struct Settings {
    columns: Vec<String>,
    percentile: f64,
    recalibrate: bool,
    zero_line: Option<BTreeMap<String, f64>>,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        let percentile = params.f64(KIND, "percentile")?;
        if !(0.0..=100.0).contains(&percentile) {
            return Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                format!("percentile must be in [0, 100], got {percentile}"),
            ));
        }

        let zero_line = match params.get("zero_line") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(
                map.iter()
                    .map(|(k, v)| {
                        v.as_f64().map(|f| (k.clone(), f)).ok_or_else(|| {
                            ErgoError::invalid_parameter(
                                KIND.as_str(),
                                format!("zero_line entry '{k}' must be a number"),
                            )
                        })
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()?,
            ),
            Some(_) => {
                return Err(ErgoError::invalid_parameter(
                    KIND.as_str(),
                    "zero_line must be an object of column offsets",
                ))
            }
        };

        Ok(Self {
            columns: params.string_list(KIND, "columns")?,
            percentile,
            recalibrate: params.bool(KIND, "recalibrate")?,
            zero_line,
        })
    }
}

/// Subtracts a calibrated per-column zero line
#[derive(Debug, Clone)]
pub struct Center {
    params: StageParams,
}

impl Center {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for Center {
    fn kind(&self) -> StageKind {
        KIND
    }

    fn get_parameters(&self) -> &StageParams {
        &self.params
    }

    fn update(&mut self, params: StageParams) -> Result<(), ErgoError> {
        self.params = configure(KIND, &self.params, params, Settings::parse)?;
        Ok(())
    }

    fn apply(&self, mut series: Series, params: &StageParams) -> Result<StageOutput, ErgoError> {
        let settings = Settings::parse(params)?;
        require_columns(&series, &settings.columns)?;

        let calibrated = match settings.zero_line {
            Some(line) if !settings.recalibrate => Some(line),
            previous => calibrate(&series, &settings.columns, settings.percentile).or(previous),
        };

        let mut next_params = params.clone();
        if let Some(line) = &calibrated {
            for name in &settings.columns {
                let offset = line.get(name).copied().unwrap_or(0.0);
                if let Some(values) = series.column_mut(name) {
                    values.iter_mut().for_each(|v| *v -= offset);
                }
            }
            let map: Map<String, Value> = line.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            next_params.set("zero_line", Value::Object(map));
        }

        Ok(StageOutput {
            series,
            changes: ChangeDescriptor::updated(settings.columns),
            params: next_params,
        })
    }
}

/// Per-column percentile of this chunk, or `None` if any column has no data
fn calibrate(
    series: &Series,
    columns: &[String],
    percentile: f64,
) -> Option<BTreeMap<String, f64>> {
    let line = columns
        .iter()
        .map(|name| {
            let values = series.column(name)?;
            stats::percentile(values, percentile).map(|p| (name.clone(), p))
        })
        .collect::<Option<BTreeMap<_, _>>>()?;
    debug!(?line, "calibrated zero line");
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::timestamps;
    use pretty_assertions::assert_eq;

    fn stage(recalibrate: bool) -> Center {
        Center::new(
            StageParams::new()
                .with("columns", json!(["x"]))
                .with("recalibrate", recalibrate),
        )
        .unwrap()
    }

    fn series(values: Vec<f64>) -> Series {
        Series::new(timestamps(values.len()))
            .with_column("x", values)
            .unwrap()
    }

    #[test]
    fn test_zero_line_carries_to_next_chunk() {
        let stage = stage(false);

        let first = stage
            .apply(series(vec![10.0, 12.0, 14.0]), stage.get_parameters())
            .unwrap();
        assert_eq!(first.series.column("x").unwrap(), &[-2.0, 0.0, 2.0]);
        assert_eq!(first.params.get("zero_line"), Some(&json!({"x": 12.0})));

        // The second chunk is centered on the first chunk's median, not its own
        let second = stage
            .apply(series(vec![20.0, 22.0]), &first.params)
            .unwrap();
        assert_eq!(second.series.column("x").unwrap(), &[8.0, 10.0]);
        assert_eq!(second.params.get("zero_line"), Some(&json!({"x": 12.0})));

        // Configured parameters are untouched by the run
        assert_eq!(stage.get_parameters().get("zero_line"), Some(&Value::Null));
    }

    #[test]
    fn test_recalibrate_uses_each_chunk() {
        let stage = stage(true);
        let first = stage
            .apply(series(vec![10.0, 12.0, 14.0]), stage.get_parameters())
            .unwrap();
        let second = stage
            .apply(series(vec![20.0, 22.0]), &first.params)
            .unwrap();
        assert_eq!(second.series.column("x").unwrap(), &[-1.0, 1.0]);
    }

    #[test]
    fn test_empty_chunk_defers_calibration() {
        let stage = stage(false);
        let empty = stage.apply(series(vec![]), stage.get_parameters()).unwrap();
        assert_eq!(empty.params.get("zero_line"), Some(&Value::Null));

        let next = stage.apply(series(vec![4.0, 6.0]), &empty.params).unwrap();
        assert_eq!(next.series.column("x").unwrap(), &[-1.0, 1.0]);
    }

    #[test]
    fn test_preset_zero_line() {
        let stage = Center::new(
            StageParams::new()
                .with("columns", json!(["x"]))
                .with("zero_line", json!({"x": 1.0})),
        )
        .unwrap();
        let out = stage
            .apply(series(vec![1.0, 2.0]), stage.get_parameters())
            .unwrap();
        assert_eq!(out.series.column("x").unwrap(), &[0.0, 1.0]);
    }
}
