//! Configuration management
//!
//! One explicit [`ErgoConfig`] is built at startup (defaults, or a TOML file)
//! and handed to the chunk source, pipeline, scoring engine and report builder.

use crate::error::ErgoError;
use crate::pipeline::PipelineConfig;
use crate::report::ReportConfig;
use crate::sampling::SamplingConfig;
use crate::scoring::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErgoConfig {
    /// Chunk source settings
    pub sampling: SamplingConfig,
    /// Stage list and cache behavior
    pub pipeline: PipelineConfig,
    /// Metric settings and reducers
    pub scoring: ScoringConfig,
    pub report: ReportConfig,
}

impl ErgoConfig {
    /// Validate every section; returns the first problem found
    pub fn validate(&self) -> Result<(), ErgoError> {
        self.sampling.policy()?;
        self.pipeline.validate()?;
        self.scoring.validate()?;
        self.report.validate()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ErgoError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ErgoError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save config to file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ErgoError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String, ErgoError> {
        toml::to_string_pretty(self).map_err(|e| ErgoError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{AxisCombine, Reducer};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        ErgoConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ErgoConfig::from_toml_str(
            r#"
            [sampling]
            use_subsampling = true
            chunk_size = 600

            [scoring.posture]
            threshold = 45.0
            combine = "separate"

            [scoring.aggregation]
            chunk_reducer = "keep_separate"
            "#,
        )
        .unwrap();

        assert!(config.sampling.use_subsampling);
        assert_eq!(config.sampling.chunk_size, 600);
        assert_eq!(config.sampling.number_of_chunks, 1);
        assert_eq!(config.scoring.posture.threshold, 45.0);
        assert_eq!(config.scoring.posture.combine, AxisCombine::Separate);
        assert_eq!(config.scoring.posture.percentile, 50.0);
        assert_eq!(config.scoring.aggregation.chunk_reducer, Reducer::KeepSeparate);
        assert_eq!(config.pipeline.stages.len(), 6);
    }

    #[test]
    fn test_contradictory_sampling_rejected() {
        let result = ErgoConfig::from_toml_str(
            r#"
            [sampling]
            randomize = true
            consecutive = true
            "#,
        );
        assert!(matches!(result, Err(ErgoError::Config(_))));
    }

    #[test]
    fn test_randomize_without_consecutive_accepted() {
        let config = ErgoConfig::from_toml_str(
            r#"
            [sampling]
            randomize = true
            seed = 3
            "#,
        )
        .unwrap();
        assert!(!config.sampling.is_consecutive());
        assert_eq!(config.sampling.consecutive, None);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = ErgoConfig::from_toml_str("[sampling\nchunk_size = 1");
        assert!(matches!(result, Err(ErgoError::Toml(_))));
    }

    #[test]
    fn test_custom_stage_list() {
        let config = ErgoConfig::from_toml_str(
            r#"
            [[pipeline.stages]]
            name = "deltas"
            kind = "delta_angles"

            [[pipeline.stages]]
            name = "clip"
            kind = "clip_range"
            params = { min = -90.0, max = 90.0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.stages.len(), 2);
        assert_eq!(config.pipeline.stages[1].params.get("max"), Some(&serde_json::json!(90.0)));
    }

    #[test]
    fn test_unknown_stage_kind_rejected() {
        let result = ErgoConfig::from_toml_str(
            r#"
            [[pipeline.stages]]
            name = "x"
            kind = "fourier"
            "#,
        );
        assert!(matches!(result, Err(ErgoError::UnknownStage(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ergo.toml");

        let mut config = ErgoConfig::default();
        config.sampling.use_subsampling = true;
        config.sampling.chunk_size = 120;
        config.sampling.seed = Some(7);
        config.pipeline.device_id = "glove-42".to_string();
        config.save(&path).unwrap();

        let loaded = ErgoConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
