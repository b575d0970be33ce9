//! Date window filter stage

use super::{configure, StageKind, StageOutput, StageParams, TransformationStage};
use crate::error::ErgoError;
use crate::types::{ChangeDescriptor, Series};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

const KIND: StageKind = StageKind::CutOff;

pub(super) fn default_params() -> StageParams {
    StageParams::new()
        .with("cut_off_date", Value::Null)
        .with("end_date", Value::Null)
}

struct Settings {
    cut_off_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

impl Settings {
    fn parse(params: &StageParams) -> Result<Self, ErgoError> {
        let settings = Self {
            cut_off_date: params.opt_datetime(KIND, "cut_off_date")?,
            end_date: params.opt_datetime(KIND, "end_date")?,
        };
        if let (Some(start), Some(end)) = (settings.cut_off_date, settings.end_date) {
            if start > end {
                return Err(ErgoError::invalid_parameter(
                    KIND.as_str(),
                    "cut_off_date is after end_date",
                ));
            }
        }
        Ok(settings)
    }
}

/// Drops rows before `cut_off_date` and after `end_date`
#[derive(Debug, Clone)]
pub struct CutOff {
    params: StageParams,
}

impl CutOff {
    pub fn new(overrides: StageParams) -> Result<Self, ErgoError> {
        let params = configure(KIND, &default_params(), overrides, Settings::parse)?;
        Ok(Self { params })
    }
}

impl TransformationStage for CutOff {
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

    fn apply(&self, series: Series, params: &StageParams) -> Result<StageOutput, ErgoError> {
        let settings = Settings::parse(params)?;
        let keep: Vec<usize> = series
            .timestamps()
            .iter()
            .enumerate()
            .filter(|(_, ts)| settings.cut_off_date.map_or(true, |cut| **ts >= cut))
            .filter(|(_, ts)| settings.end_date.map_or(true, |end| **ts <= end))
            .map(|(i, _)| i)
            .collect();

        let series = if keep.len() == series.len() {
            series
        } else {
            debug!(dropped = series.len() - keep.len(), "cut_off removed rows");
            series.select_rows(&keep)
        };

        Ok(StageOutput {
            series,
            changes: ChangeDescriptor::none(),
            params: params.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{timestamps, two_board_series};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_keeps_everything() {
        let stage = CutOff::new(StageParams::new()).unwrap();
        let series = two_board_series(5);
        let out = stage.apply(series.clone(), stage.get_parameters()).unwrap();
        assert_eq!(out.series, series);
        assert_eq!(out.changes, ChangeDescriptor::none());
    }

    #[test]
    fn test_drops_rows_outside_window() {
        let ts = timestamps(6);
        let stage = CutOff::new(
            StageParams::new()
                .with("cut_off_date", ts[2].to_rfc3339())
                .with("end_date", ts[4].to_rfc3339()),
        )
        .unwrap();

        let out = stage
            .apply(two_board_series(6), stage.get_parameters())
            .unwrap();
        assert_eq!(out.series.timestamps(), &ts[2..=4]);
        assert_eq!(out.series.column("hand_yaw").unwrap(), &[12.0, 13.0, 14.0]);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let result = CutOff::new(
            StageParams::new()
                .with("cut_off_date", "2024-03-05")
                .with("end_date", "2024-03-04"),
        );
        assert!(result.is_err());
    }
}
