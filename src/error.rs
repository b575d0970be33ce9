//! Error types for Ergo Flux

use thiserror::Error;

/// Errors that can occur while chunking, transforming or scoring a series
#[derive(Debug, Error)]
pub enum ErgoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter for stage '{stage}': {message}")]
    InvalidParameter { stage: String, message: String },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Value {value} outside binning range [{lo}, {hi}]")]
    OutOfRange { value: f64, lo: f64, hi: f64 },

    #[error("Column invariant violated: {0}")]
    ColumnInvariant(String),

    #[error("Stage '{stage}' declared removal of column '{column}', which is unsupported")]
    UnsupportedChange { stage: String, column: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ErgoError {
    /// Shorthand for a stage parameter error
    pub fn invalid_parameter(stage: &str, message: impl Into<String>) -> Self {
        ErgoError::InvalidParameter {
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}
