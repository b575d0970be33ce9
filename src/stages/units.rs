//! Angle unit conversion stage

use super::{configure, require_columns, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::types::{raw_channel_names, ChangeDescriptor, Series};
use serde_json::json;

const KIND: StageKind = StageKind::ConvertUnits;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("columns", json!(raw_channel_names()))
        .with("units", "deg")
}

/// Units the source channels are reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnits {
    Degrees,
    Radians,
}

impl std::str::FromStr for AngleUnits {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deg" | "degrees" => Ok(AngleUnits::Degrees),
            "rad" | "radians" => Ok(AngleUnits::Radians),
            other => Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                format!("unknown units '{other}'"),
            )),
        }
    }
}

struct Settings {
    columns: Vec<String>,
    units: AngleUnits,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        Ok(Self {
            columns: params.string_list(KIND, "columns")?,
            units: params.string(KIND, "units")?.parse()?,
        })
    }
}

/// Converts the configured columns to degrees
#[derive(Debug, Clone)]
pub struct ConvertUnits {
    params: StageParams,
}

impl ConvertUnits {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for ConvertUnits {
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

        if settings.units == AngleUnits::Degrees {
            return Ok(StageOutput {
                series,
                changes: ChangeDescriptor::none(),
                params: params.clone(),
            });
        }

        for name in &settings.columns {
            if let Some(values) = series.column_mut(name) {
                values.iter_mut().for_each(|v| *v = v.to_degrees());
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
    use std::f64::consts::PI;

    #[test]
    fn test_radians_converted() {
        let stage = ConvertUnits::new(
            StageParams::new()
                .with("columns", json!(["x"]))
                .with("units", "rad"),
        )
        .unwrap();
        let series = Series::new(timestamps(2))
            .with_column("x", vec![PI, -PI / 2.0])
            .unwrap();

        let out = stage.apply(series, stage.get_parameters()).unwrap();
        let x = out.series.column("x").unwrap();
        assert!((x[0] - 180.0).abs() < 1e-9);
        assert!((x[1] + 90.0).abs() < 1e-9);
        assert!(out.changes.updated.contains("x"));
    }

    #[test]
    fn test_degrees_untouched() {
        let stage = ConvertUnits::new(StageParams::new().with("columns", json!(["x"]))).unwrap();
        let series = Series::new(timestamps(1)).with_column("x", vec![1.0]).unwrap();
        let out = stage.apply(series.clone(), stage.get_parameters()).unwrap();
        assert_eq!(out.series, series);
        assert!(out.changes.updated.is_empty());
    }
}
