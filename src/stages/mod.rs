//! Transformation stages
//!
//! A stage is one named operation on a chunk. Stages are stateless between
//! calls except through their parameter object: `apply` receives the stage's
//! parameters from its previous invocation and returns the parameters to use on
//! the next chunk. This is how the centering stage calibrates a zero line on
//! one chunk and reuses it on the next.
//!
//! Stages are built from a [`StageRegistry`] keyed by [`StageKind`].

mod center;
mod clip;
mod cut_off;
mod delta;
mod impute;
mod units;

pub use center::Center;
pub use clip::ClipRange;
pub use cut_off::CutOff;
pub use delta::DeltaAngles;
pub use impute::{Impute, ImputeMethod};
pub use units::{AngleUnits, ConvertUnits};

use crate::error::ErgoError;
use crate::types::{ChangeDescriptor, Series};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of stage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    CutOff,
    Impute,
    ConvertUnits,
    DeltaAngles,
    ClipRange,
    Center,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::CutOff,
        StageKind::Impute,
        StageKind::ConvertUnits,
        StageKind::DeltaAngles,
        StageKind::ClipRange,
        StageKind::Center,
    ];

    /// Registry identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::CutOff => "cut_off",
            StageKind::Impute => "impute",
            StageKind::ConvertUnits => "convert_units",
            StageKind::DeltaAngles => "delta_angles",
            StageKind::ClipRange => "clip_range",
            StageKind::Center => "center",
        }
    }

    /// Default parameter set for this stage type
    pub fn default_params(&self) -> StageParams {
        match self {
            StageKind::CutOff => cut_off::default_params(),
            StageKind::Impute => impute::default_params(),
            StageKind::ConvertUnits => units::default_params(),
            StageKind::DeltaAngles => delta::default_params(),
            StageKind::ClipRange => clip::default_params(),
            StageKind::Center => center::default_params(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ErgoError::UnknownStage(s.to_string()))
    }
}

/// Result of one stage invocation
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub series: Series,
    pub changes: ChangeDescriptor,
    /// Parameters to feed into this stage's next invocation
    pub params: StageParams,
}

/// A single transformation applied to every chunk
pub trait TransformationStage: fmt::Debug {
    fn kind(&self) -> StageKind;

    /// The configured parameters (the state fed to the first chunk)
    fn get_parameters(&self) -> &StageParams;

    /// Merge new parameter values into the configuration
    fn update(&mut self, params: StageParams) -> Result<(), ErgoError>;

    /// Transform one chunk using the given (possibly carried-over) parameters
    fn apply(&self, series: Series, params: &StageParams) -> Result<StageOutput, ErgoError>;
}

/// Ordered key/value parameter object of a stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageParams(BTreeMap<String, Value>);

impl StageParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), float_numbers(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay `overrides` on `self`, rejecting keys `self` does not define
    pub fn merged(
        &self,
        overrides: StageParams,
        kind: StageKind,
    ) -> Result<StageParams, ErgoError> {
        let mut merged = self.clone();
        for (key, value) in overrides.0 {
            if !merged.0.contains_key(&key) {
                return Err(ErgoError::invalid_parameter(
                    kind.as_str(),
                    format!("unknown parameter '{key}'"),
                ));
            }
            merged.0.insert(key, float_numbers(value));
        }
        Ok(merged)
    }

    fn required(&self, kind: StageKind, key: &str) -> Result<&Value, ErgoError> {
        self.get(key)
            .ok_or_else(|| ErgoError::invalid_parameter(kind.as_str(), format!("missing '{key}'")))
    }

    pub fn f64(&self, kind: StageKind, key: &str) -> Result<f64, ErgoError> {
        self.required(kind, key)?.as_f64().ok_or_else(|| {
            ErgoError::invalid_parameter(kind.as_str(), format!("'{key}' must be a number"))
        })
    }

    pub fn bool(&self, kind: StageKind, key: &str) -> Result<bool, ErgoError> {
        self.required(kind, key)?.as_bool().ok_or_else(|| {
            ErgoError::invalid_parameter(kind.as_str(), format!("'{key}' must be a boolean"))
        })
    }

    pub fn string(&self, kind: StageKind, key: &str) -> Result<String, ErgoError> {
        self.required(kind, key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ErgoError::invalid_parameter(kind.as_str(), format!("'{key}' must be a string"))
            })
    }

    pub fn string_list(&self, kind: StageKind, key: &str) -> Result<Vec<String>, ErgoError> {
        let invalid = || {
            ErgoError::invalid_parameter(
                kind.as_str(),
                format!("'{key}' must be a list of strings"),
            )
        };
        self.required(kind, key)?
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect()
    }

    /// Optional timestamp given as RFC 3339 or as a plain `YYYY-MM-DD` date
    pub fn opt_datetime(
        &self,
        kind: StageKind,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>, ErgoError> {
        let text = match self.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(text)) => text,
            Some(_) => {
                return Err(ErgoError::invalid_parameter(
                    kind.as_str(),
                    format!("'{key}' must be a date string"),
                ))
            }
        };

        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Some(naive.and_utc()))
            .ok_or_else(|| {
                ErgoError::invalid_parameter(
                    kind.as_str(),
                    format!("'{key}': cannot parse '{text}'"),
                )
            })
    }
}

/// Store every number as `f64` so `50` and `50.0` are the same parameter value
fn float_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) if !n.is_f64() => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Number(n), Value::Number),
        Value::Array(items) => Value::Array(items.into_iter().map(float_numbers).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, float_numbers(v))).collect())
        }
        other => other,
    }
}

impl From<BTreeMap<String, Value>> for StageParams {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Factory building a stage from parameter overrides
pub type StageFactory = fn(StageParams) -> Result<Box<dyn TransformationStage>, ErgoError>;

/// Maps stage identifiers to their constructors
#[derive(Debug, Clone)]
pub struct StageRegistry {
    factories: BTreeMap<StageKind, StageFactory>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StageRegistry {
    /// Registry with no factories
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in stage
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(StageKind::CutOff, build_cut_off);
        registry.register(StageKind::Impute, build_impute);
        registry.register(StageKind::ConvertUnits, build_convert_units);
        registry.register(StageKind::DeltaAngles, build_delta_angles);
        registry.register(StageKind::ClipRange, build_clip_range);
        registry.register(StageKind::Center, build_center);
        registry
    }

    /// Register or replace the factory for a stage kind
    pub fn register(&mut self, kind: StageKind, factory: StageFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build a stage from its identifier
    pub fn create(
        &self,
        identifier: &str,
        params: StageParams,
    ) -> Result<Box<dyn TransformationStage>, ErgoError> {
        let kind: StageKind = identifier.parse()?;
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| ErgoError::UnknownStage(identifier.to_string()))?;
        factory(params)
    }

    /// Identifiers of all registered stages
    pub fn identifiers(&self) -> Vec<&'static str> {
        self.factories.keys().map(StageKind::as_str).collect()
    }
}

fn build_cut_off(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(CutOff::new(params)?))
}

fn build_impute(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(Impute::new(params)?))
}

fn build_convert_units(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(ConvertUnits::new(params)?))
}

fn build_delta_angles(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(DeltaAngles::new(params)?))
}

fn build_clip_range(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(ClipRange::new(params)?))
}

fn build_center(params: StageParams) -> Result<Box<dyn TransformationStage>, ErgoError> {
    Ok(Box::new(Center::new(params)?))
}

/// Merge overrides into a base parameter set and validate the result
fn configure<T>(
    kind: StageKind,
    base: &StageParams,
    overrides: StageParams,
    parse: fn(&StageParams) -> Result<T, ErgoError>,
) -> Result<StageParams, ErgoError> {
    let merged = base.merged(overrides, kind)?;
    parse(&merged)?;
    Ok(merged)
}

/// Require every listed column to exist
fn require_columns(series: &Series, columns: &[String]) -> Result<(), ErgoError> {
    match columns.iter().find(|c| !series.has_column(c)) {
        Some(missing) => Err(ErgoError::MissingColumn(missing.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_round_trips_identifier() {
        for kind in StageKind::ALL {
            assert_eq!(kind.as_str().parse::<StageKind>().unwrap(), kind);
        }
        assert!(matches!(
            "eval".parse::<StageKind>(),
            Err(ErgoError::UnknownStage(_))
        ));
    }

    #[test]
    fn test_registry_builds_every_builtin() {
        let registry = StageRegistry::builtin();
        assert_eq!(registry.identifiers().len(), StageKind::ALL.len());
        for id in registry.identifiers() {
            let stage = registry.create(id, StageParams::new()).unwrap();
            assert_eq!(stage.kind().as_str(), id);
            assert_eq!(stage.get_parameters(), &stage.kind().default_params());
        }
    }

    #[test]
    fn test_empty_registry_rejects_known_kind() {
        let registry = StageRegistry::empty();
        let result = registry.create("center", StageParams::new());
        assert!(matches!(result, Err(ErgoError::UnknownStage(_))));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let registry = StageRegistry::builtin();
        let result = registry.create("clip_range", StageParams::new().with("maximum", 10.0));
        assert!(matches!(result, Err(ErgoError::InvalidParameter { .. })));
    }

    #[test]
    fn test_integer_overrides_match_float_defaults() {
        let registry = StageRegistry::builtin();
        let default = registry.create("center", StageParams::new()).unwrap();
        let integer = registry
            .create("center", StageParams::new().with("percentile", 50))
            .unwrap();
        assert_eq!(integer.get_parameters(), default.get_parameters());

        let nested = StageParams::new().with("zero_line", serde_json::json!({"x": 1, "y": [2]}));
        assert_eq!(
            nested.get("zero_line"),
            Some(&serde_json::json!({"x": 1.0, "y": [2.0]}))
        );
    }

    #[test]
    fn test_update_merges_and_validates() {
        let registry = StageRegistry::builtin();
        let mut stage = registry.create("clip_range", StageParams::new()).unwrap();

        stage
            .update(StageParams::new().with("max", 90.0))
            .unwrap();
        assert_eq!(stage.get_parameters().get("max"), Some(&Value::from(90.0)));
        assert_eq!(stage.get_parameters().get("min"), Some(&Value::from(-180.0)));

        let bad = stage.update(StageParams::new().with("min", 120.0));
        assert!(bad.is_err());
        // A rejected update leaves the configuration untouched
        assert_eq!(stage.get_parameters().get("min"), Some(&Value::from(-180.0)));
    }

    #[test]
    fn test_opt_datetime_accepts_date_and_rfc3339() {
        let kind = StageKind::CutOff;
        let params = StageParams::new()
            .with("a", "2024-03-04")
            .with("b", "2024-03-04T08:00:00Z")
            .with("c", Value::Null)
            .with("d", "yesterday");

        let a = params.opt_datetime(kind, "a").unwrap().unwrap();
        assert_eq!(a.to_rfc3339(), "2024-03-04T00:00:00+00:00");
        assert!(params.opt_datetime(kind, "b").unwrap().is_some());
        assert!(params.opt_datetime(kind, "c").unwrap().is_none());
        assert!(params.opt_datetime(kind, "missing").unwrap().is_none());
        assert!(params.opt_datetime(kind, "d").is_err());
    }
}
