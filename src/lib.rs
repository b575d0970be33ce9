//! Ergo Flux - chunked filter pipeline and ergonomic-risk scoring
//!
//! Ergo Flux turns a continuous two-board orientation series from a wearable
//! motion sensor into bounded ergonomic-risk scores: chunk sampling →
//! stateful transformation stages → structured delta angles → windowed
//! scoring → aggregation → report.
//!
//! ## Modules
//!
//! - **Sampling**: derive analysis chunks under several sampling policies
//! - **Stages / Pipeline**: registry-built stages with parameter carry-over
//!   between chunks and column invariant checks
//! - **Cache**: content-addressed storage of pipeline results
//! - **Scoring**: Activity/Speed, Posture and Strain scores plus aggregation

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod report;
pub mod sampling;
pub mod scoring;
pub mod stages;
pub mod stats;
pub mod types;

pub use cache::{CacheMetadata, FileStore, MemoryStore, ObjectStore, ResultCache};
pub use config::ErgoConfig;
pub use error::ErgoError;
pub use pipeline::{Pipeline, PipelineConfig, PipelineRun, StageSpec};
pub use processor::{score_series, ErgoProcessor};
pub use report::{Report, ReportBuilder, ReportConfig};
pub use sampling::{ChunkSource, SamplingConfig, SamplingPolicy};
pub use scoring::{AggregatedScores, Metric, ScoreRecord, ScoringConfig, ScoringEngine};
pub use stages::{StageKind, StageParams, StageRegistry, TransformationStage};
pub use types::{Axis, Chunk, ChunkInfo, Series, SeriesRecord, StructuredData};

/// Crate version, also the default cache revision
pub const ERGO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on reports
pub const PRODUCER_NAME: &str = "ergo-flux";
