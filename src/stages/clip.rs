//! Range clamp stage

use super::{configure, require_columns, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::types::{delta_column_names, ChangeDescriptor, Series};
use serde_json::json;

const KIND: StageKind = StageKind::ClipRange;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("columns", json!(delta_column_names()))
        .with("min", -180.0)
        .with("max", 180.0)
}

struct Settings {
    columns: Vec<String>,
    min: f64,
    max: f64,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        let settings = Self {
            columns: params.string_list(KIND, "columns")?,
            min: params.f64(KIND, "min")?,
            max: params.f64(KIND, "max")?,
        };
        if settings.min >= settings.max {
            return Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                format!("min ({}) must be below max ({})", settings.min, settings.max),
            ));
        }
        Ok(settings)
    }
}

/// Clamps columns into `[min, max]`; missing values stay missing
#[derive(Debug, Clone)]
pub struct ClipRange {
    params: StageParams,
}

impl ClipRange {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for ClipRange {
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

        for name in &settings.columns {
            if let Some(values) = series.column_mut(name) {
                for value in values.iter_mut().filter(|v| !v.is_nan()) {
                    *value = value.clamp(settings.min, settings.max);
                }
            }
        }

        Ok(StageOutput {
            series,
            changes: ChangeDescriptor::updated(settings.columns),
            params: params.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::timestamps;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clip_clamps_and_keeps_missing() {
        let stage = ClipRange::new(
            StageParams::new()
                .with("columns", json!(["x"]))
                .with("min", -10.0)
                .with("max", 10.0),
        )
        .unwrap();
        let series = Series::new(timestamps(4))
            .with_column("x", vec![-50.0, 5.0, f64::NAN, 12.0])
            .unwrap();

        let out = stage.apply(series, stage.get_parameters()).unwrap();
        let x = out.series.column("x").unwrap();
        assert_eq!(x[0], -10.0);
        assert_eq!(x[1], 5.0);
        assert!(x[2].is_nan());
        assert_eq!(x[3], 10.0);
        assert!(out.changes.updated.contains("x"));
    }

    #[test]
    fn test_clip_requires_columns() {
        let stage = ClipRange::new(StageParams::new()).unwrap();
        let series = Series::new(timestamps(2));
        let result = stage.apply(series, stage.get_parameters());
        assert!(matches!(result, Err(ErgoError::MissingColumn(_))));
    }
}
