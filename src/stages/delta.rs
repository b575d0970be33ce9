//! Delta-angle construction stage
//!
//! Derives `delta_{axis}` as the difference between two boards' readings for
//! each axis, optionally wrapped into `[-180, 180)` degrees.

use super::{configure, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::types::{Axis, ChangeDescriptor, Series, HAND_BOARD, WRIST_BOARD};
use serde_json::json;

const KIND: StageKind = StageKind::DeltaAngles;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("minuend", HAND_BOARD)
        .with("subtrahend", WRIST_BOARD)
        .with("axes", json!(["yaw", "pitch", "roll"]))
        .with("wrap", true)
}

struct Settings {
    minuend: String,
    subtrahend: String,
    axes: Vec<Axis>,
    wrap: bool,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        let axes = params
            .string_list(KIND, "axes")?
            .iter()
            .map(|a| a.parse::<Axis>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ErgoError::invalid_parameter(KIND.as_str(), e.to_string()))?;
        let settings = Self {
            minuend: params.string(KIND, "minuend")?,
            subtrahend: params.string(KIND, "subtrahend")?,
            axes,
            wrap: params.bool(KIND, "wrap")?,
        };
        if settings.minuend == settings.subtrahend {
            return Err(ErgoError::invalid_parameter(
                KIND.as_str(),
                "minuend and subtrahend must be different boards",
            ));
        }
        Ok(settings)
    }
}

/// Wrap an angle difference into `[-180, 180)`
fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

/// Adds one delta-angle column per configured axis
#[derive(Debug, Clone)]
pub struct DeltaAngles {
    params: StageParams,
}

impl DeltaAngles {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for DeltaAngles {
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
        let mut added = Vec::with_capacity(settings.axes.len());

        for axis in &settings.axes {
            let a = series.require_column(&axis.board_column(&settings.minuend))?;
            let b = series.require_column(&axis.board_column(&settings.subtrahend))?;
            let delta: Vec<f64> = a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = x - y;
                    if settings.wrap {
                        wrap_degrees(d)
                    } else {
                        d
                    }
                })
                .collect();

            let name = axis.delta_column();
            series.insert_column(name.clone(), delta)?;
            added.push(name);
        }

        Ok(StageOutput {
            series,
            changes: ChangeDescriptor::added(added),
            params: params.clone(),
        })
    }
}
