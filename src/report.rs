//! Report encoding
//!
//! Turns aggregated scores into a report with producer metadata and the
//! observed time span, and flattens it into the key/value payload consumed by
//! downstream sinks.

use crate::error::ErgoError;
use crate::scoring::{Aggregate, AggregatedScores};
use crate::types::StructuredData;
use crate::{ERGO_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Report settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Decimal places kept in payload values; unset keeps full precision
    pub precision: Option<u32>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { precision: Some(4) }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        match self.precision {
            Some(p) if p > 12 => Err(ErgoError::Config(format!(
                "report.precision must be at most 12, got {p}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Who produced a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Aggregated scores of one processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub producer: Producer,
    pub computed_at: DateTime<Utc>,
    pub device_id: String,
    /// Earliest timestamp observed across chunks
    pub start_time: Option<DateTime<Utc>>,
    /// Latest timestamp observed across chunks
    pub end_time: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub from_cache: bool,
    pub scores: AggregatedScores,
}

impl Report {
    /// Flat `{metric}_{component}` payload plus the observed time span
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for (metric, component, value) in self.scores.iter() {
            let value = match value {
                Some(Aggregate::Value(v)) => number(*v),
                Some(Aggregate::Values(vs)) => {
                    Value::Array(vs.iter().map(|v| number(*v)).collect())
                }
                None => Value::Null,
            };
            payload.insert(format!("{metric}_{component}"), value);
        }
        payload.insert("start_time".to_string(), timestamp(self.start_time));
        payload.insert("end_time".to_string(), timestamp(self.end_time));
        payload.insert("device_id".to_string(), Value::String(self.device_id.clone()));
        payload.insert("chunk_count".to_string(), Value::from(self.chunk_count));
        payload
    }

    /// Encode to pretty JSON
    pub fn to_json(&self) -> Result<String, ErgoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn timestamp(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |t| Value::String(t.to_rfc3339()))
}

/// Builds reports with a stable producer instance id
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    instance_id: String,
    config: ReportConfig,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new(ReportConfig::default())
    }
}

impl ReportBuilder {
    /// Create a builder with a fresh instance id
    pub fn new(config: ReportConfig) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            config,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Assemble a report from the chunks that were scored and their aggregates
    pub fn build(&self, data: &[StructuredData], scores: &AggregatedScores) -> Report {
        let device_id = data
            .first()
            .map(|d| d.device_id().to_string())
            .unwrap_or_default();

        Report {
            report_id: Uuid::new_v4().to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: ERGO_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at: Utc::now(),
            device_id,
            start_time: data.iter().filter_map(StructuredData::start_time).min(),
            end_time: data.iter().filter_map(StructuredData::end_time).max(),
            chunk_count: data.len(),
            from_cache: false,
            scores: self.rounded(scores),
        }
    }

    fn rounded(&self, scores: &AggregatedScores) -> AggregatedScores {
        match self.config.precision {
            Some(digits) => scores.map_values(|v| round_to(v, digits)),
            None => scores.clone(),
        }
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}
