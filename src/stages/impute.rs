//! Missing-value imputation stage

use super::{configure, require_columns, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::types::{raw_channel_names, ChangeDescriptor, Series};
use serde_json::json;

const KIND: StageKind = StageKind::Impute;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("columns", json!(raw_channel_names()))
        .with("method", "linear")
        .with("max_missing_fraction", 1.0)
}

/// How gaps are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputeMethod {
    /// Interpolate interior gaps; edges take the nearest valid value
    Linear,
    /// Carry the last valid value forward; leading gaps take the first valid value
    ForwardFill,
    /// Replace missing values with zero
    Zero,
}

impl std::str::FromStr for ImputeMethod {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ImputeMethod::Linear),
            "ffill" => Ok(ImputeMethod::ForwardFill),
            "zero" => Ok(ImputeMethod::Zero),
            other => Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                format!("unknown method '{other}'"),
            )),
        }
    }
}

struct Settings {
    columns: Vec<String>,
    method: ImputeMethod,
    max_missing_fraction: f64,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        let max_missing_fraction = params.f64(KIND, "max_missing_fraction")?;
        if !(0.0..=1.0).contains(&max_missing_fraction) {
            return Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                format!("max_missing_fraction must be in [0, 1], got {max_missing_fraction}"),
            ));
        }
        Ok(Self {
            columns: params.string_list(KIND, "columns")?,
            method: params.string(KIND, "method")?.parse()?,
            max_missing_fraction,
        })
    }
}

/// Fills `NaN` gaps in the configured columns
#[derive(Debug, Clone)]
pub struct Impute {
    params: StageParams,
}

impl Impute {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for Impute {
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
            let Some(values) = series.column_mut(name) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }

            let missing = values.iter().filter(|v| v.is_nan()).count();
            let fraction = missing as f64 / values.len() as f64;
            if fraction > settings.max_missing_fraction {
                return Err(ErgoError::InsufficientData(format!(
                    "column '{name}' is {:.1}% missing (limit {:.1}%)",
                    fraction * 100.0,
                    settings.max_missing_fraction * 100.0
                )));
            }

            match settings.method {
                ImputeMethod::Linear => fill_linear(values),
                ImputeMethod::ForwardFill => fill_forward(values),
                ImputeMethod::Zero => values
                    .iter_mut()
                    .filter(|v| v.is_nan())
                    .for_each(|v| *v = 0.0),
            }
        }

        Ok(StageOutput {
            series,
            changes: ChangeDescriptor::updated(settings.columns),
            params: params.clone(),
        })
    }
}

fn fill_linear(values: &mut [f64]) {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return;
    };

    let (head, tail) = (values[first], values[last]);
    values[..first].iter_mut().for_each(|v| *v = head);
    values[last + 1..].iter_mut().for_each(|v| *v = tail);

    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f64;
        for i in a + 1..b {
            values[i] = values[a] + (values[b] - values[a]) * (i - a) as f64 / span;
        }
    }
}

fn fill_forward(values: &mut [f64]) {
    let Some(first) = values.iter().copied().find(|v| !v.is_nan()) else {
        return;
    };
    let mut last = first;
    for value in values.iter_mut() {
        if value.is_nan() {
            *value = last;
        } else {
            last = *value;
        }
    }
}
