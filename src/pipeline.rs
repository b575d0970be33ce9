//! Pipeline orchestration
//!
//! A [`Pipeline`] owns an ordered list of transformation stages and a chunk
//! source. For every chunk it:
//! 1. invokes each stage once, in order, feeding it the parameters it returned
//!    for the previous chunk
//! 2. checks the declared column changes against the resulting column set
//! 3. restores untouched columns from the input chunk, aligned by timestamp
//! 4. sorts (unless `assume_sorted`) and drops duplicate timestamps
//! 5. emits one [`StructuredData`] record
//!
//! Results can be short-circuited through a content-addressed [`ResultCache`].

use crate::cache::{fingerprint_series, hash_json, sha256_hex, CacheMetadata, ResultCache};
use crate::error::ErgoError;
use crate::sampling::{ChunkSource, SamplingConfig};
use crate::stages::{StageKind, StageOutput, StageParams, StageRegistry, TransformationStage};
use crate::types::{Axis, Chunk, Series, StructuredData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// One configured stage: a user-facing label, a registry identifier and overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "StageParams::is_empty")]
    pub params: StageParams,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind: kind.as_str().to_string(),
            params: StageParams::new(),
        }
    }

    pub fn with_params(mut self, params: StageParams) -> Self {
        self.params = params;
        self
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Device id stamped on every structured data record
    pub device_id: String,
    /// Skip the final timestamp sort
    pub assume_sorted: bool,
    pub use_cache: bool,
    /// Software revision mixed into cache keys; defaults to the crate version
    pub revision: Option<String>,
    pub stages: Vec<StageSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let stages = [
            StageKind::CutOff,
            StageKind::Impute,
            StageKind::ConvertUnits,
            StageKind::DeltaAngles,
            StageKind::Center,
            StageKind::ClipRange,
        ]
        .into_iter()
        .map(|kind| StageSpec::new(kind.as_str(), kind))
        .collect();

        Self {
            device_id: "unknown-device".to_string(),
            assume_sorted: false,
            use_cache: true,
            revision: None,
            stages,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ErgoError> {
        if self.device_id.trim().is_empty() {
            return Err(ErgoError::Config("pipeline.device_id must not be empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for spec in &self.stages {
            spec.kind.parse::<StageKind>()?;
            if !names.insert(spec.name.as_str()) {
                return Err(ErgoError::Config(format!("duplicate stage name '{}'", spec.name)));
            }
        }
        Ok(())
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(crate::ERGO_VERSION)
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    /// One record per chunk, in chunk order
    pub data: Vec<StructuredData>,
    /// Run key, when the cache was consulted
    pub cache_key: Option<String>,
    pub from_cache: bool,
    /// Each stage's parameters after the last chunk (empty on a cache hit)
    pub stage_states: Vec<StageParams>,
}

#[derive(Debug)]
struct PipelineStage {
    name: String,
    stage: Box<dyn TransformationStage>,
}

/// Canonical description of everything that determines a pipeline's output
#[derive(Serialize)]
struct KeyMaterial<'a> {
    revision: &'a str,
    device_id: &'a str,
    sampling: &'a SamplingConfig,
    assume_sorted: bool,
    stages: Vec<StageKey<'a>>,
}

#[derive(Serialize)]
struct StageKey<'a> {
    kind: &'static str,
    params: &'a StageParams,
}

/// Ordered stages over a chunk source
#[derive(Debug)]
pub struct Pipeline {
    source: ChunkSource,
    config: PipelineConfig,
    stages: Vec<PipelineStage>,
    cache: Option<ResultCache>,
}

impl Pipeline {
    /// Pipeline without stages
    pub fn new(sampling: SamplingConfig, config: PipelineConfig) -> Result<Self, ErgoError> {
        Ok(Self {
            source: ChunkSource::new(sampling)?,
            config: PipelineConfig {
                stages: Vec::new(),
                ..config
            },
            stages: Vec::new(),
            cache: None,
        })
    }

    /// Build every configured stage through the registry
    pub fn from_config(
        sampling: SamplingConfig,
        config: &PipelineConfig,
        registry: &StageRegistry,
    ) -> Result<Self, ErgoError> {
        config.validate()?;
        let mut pipeline = Self::new(sampling, config.clone())?;
        for spec in &config.stages {
            let stage = registry.create(&spec.kind, spec.params.clone())?;
            pipeline.add_stage(spec.name.clone(), stage)?;
        }
        Ok(pipeline)
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_cache(&mut self, cache: Option<ResultCache>) {
        self.cache = cache;
    }

    pub fn cache_mut(&mut self) -> Option<&mut ResultCache> {
        self.cache.as_mut()
    }

    /// Append a stage under a unique label
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        stage: Box<dyn TransformationStage>,
    ) -> Result<(), ErgoError> {
        let name = name.into();
        if self.stages.iter().any(|s| s.name == name) {
            return Err(ErgoError::Config(format!("duplicate stage name '{name}'")));
        }
        self.stages.push(PipelineStage { name, stage });
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn stage_parameters(&self, name: &str) -> Option<&StageParams> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.stage.get_parameters())
    }

    /// Update the configured parameters of a named stage
    pub fn update_stage(&mut self, name: &str, params: StageParams) -> Result<(), ErgoError> {
        let entry = self
            .stages
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ErgoError::UnknownStage(name.to_string()))?;
        entry.stage.update(params)
    }

    pub fn source(&self) -> &ChunkSource {
        &self.source
    }

    /// Hash of the pipeline configuration (stage labels excluded)
    pub fn cache_key(&self) -> Result<String, ErgoError> {
        let material = KeyMaterial {
            revision: self.config.revision(),
            device_id: &self.config.device_id,
            sampling: self.source.config(),
            assume_sorted: self.config.assume_sorted,
            stages: self
                .stages
                .iter()
                .map(|s| StageKey {
                    kind: s.stage.kind().as_str(),
                    params: s.stage.get_parameters(),
                })
                .collect(),
        };
        hash_json(&material)
    }

    /// Key of a run over `series`: configuration key plus input fingerprint
    pub fn cache_key_for(&self, series: Option<&Series>) -> Result<String, ErgoError> {
        let config_key = self.cache_key()?;
        let fingerprint = fingerprint_series(series)?;
        Ok(sha256_hex(format!("{config_key}{fingerprint}").as_bytes()))
    }

    fn cache_eligible(&self) -> bool {
        if !self.config.use_cache || self.cache.is_none() {
            return false;
        }
        if !self.source.config().is_reproducible() {
            debug!("unseeded random sampling, bypassing cache");
            return false;
        }
        true
    }

    /// Run the pipeline over `series`, consulting the cache when eligible
    pub fn run(&mut self, series: Option<&Series>) -> Result<PipelineRun, ErgoError> {
        let key = if self.cache_eligible() {
            Some(self.cache_key_for(series)?)
        } else {
            None
        };

        if let (Some(key), Some(cache)) = (&key, &self.cache) {
            if cache.exists(key) {
                if let Some(data) = cache.get(key) {
                    info!(key = %key, chunks = data.len(), "pipeline result served from cache");
                    return Ok(PipelineRun {
                        data,
                        cache_key: Some(key.clone()),
                        from_cache: true,
                        stage_states: Vec::new(),
                    });
                }
            }
        }

        let mut states: Vec<StageParams> = self
            .stages
            .iter()
            .map(|s| s.stage.get_parameters().clone())
            .collect();
        let mut data = Vec::new();
        for chunk in self.source.chunks(series) {
            data.push(self.process_chunk(chunk, &mut states)?);
        }
        info!(chunks = data.len(), stages = self.stages.len(), "pipeline run complete");

        if let Some(key) = &key {
            let metadata = CacheMetadata {
                revision: self.config.revision().to_string(),
                created_at: Utc::now(),
                chunk_count: data.len(),
                stage_kinds: self
                    .stages
                    .iter()
                    .map(|s| s.stage.kind().as_str().to_string())
                    .collect(),
            };
            if let Some(cache) = self.cache.as_mut() {
                cache.put(key, &data, &metadata);
            }
        }

        Ok(PipelineRun {
            data,
            cache_key: key,
            from_cache: false,
            stage_states: states,
        })
    }

    fn process_chunk(
        &self,
        chunk: Chunk,
        states: &mut [StageParams],
    ) -> Result<StructuredData, ErgoError> {
        let Chunk { data, info } = chunk;
        let Some(input) = data else {
            debug!(chunk = info.index, "absent chunk, emitting empty record");
            return Ok(StructuredData::new(
                self.config.device_id.clone(),
                info,
                Vec::new(),
                [None, None, None],
            ));
        };

        let initial = input.column_names();
        let mut added = BTreeSet::new();
        let mut touched = BTreeSet::new();
        let mut series = input.clone();

        for (entry, state) in self.stages.iter().zip(states.iter_mut()) {
            let StageOutput {
                series: next,
                changes,
                params,
            } = entry.stage.apply(series, state)?;

            if let Some(column) = changes.removed.iter().next() {
                return Err(ErgoError::UnsupportedChange {
                    stage: entry.name.clone(),
                    column: column.clone(),
                });
            }
            touched.extend(changes.touched());
            added.extend(changes.added);
            debug!(chunk = info.index, stage = %entry.name, rows = next.len(), "stage applied");

            series = next;
            *state = params;
        }

        let expected: BTreeSet<String> = initial.union(&added).cloned().collect();
        let actual = series.column_names();
        if actual != expected {
            return Err(ErgoError::ColumnInvariant(format!(
                "chunk {}: expected columns {:?}, found {:?}",
                info.index, expected, actual
            )));
        }

        let series = restore_untouched(series, &input, &touched)?;
        let series = if self.config.assume_sorted {
            series
        } else {
            series.sorted_by_timestamp()
        };
        let series = series.dedup_timestamps();

        let deltas = Axis::ALL.map(|axis| series.column(&axis.delta_column()).map(<[f64]>::to_vec));
        Ok(StructuredData::new(
            self.config.device_id.clone(),
            info,
            series.timestamps().to_vec(),
            deltas,
        ))
    }
}

/// Re-read columns no stage declared from the input chunk, matched by timestamp
fn restore_untouched(
    mut series: Series,
    input: &Series,
    touched: &BTreeSet<String>,
) -> Result<Series, ErgoError> {
    let mut first_row: HashMap<DateTime<Utc>, usize> = HashMap::with_capacity(input.len());
    for (i, ts) in input.timestamps().iter().enumerate() {
        first_row.entry(*ts).or_insert(i);
    }
    let rows: Vec<Option<usize>> = series
        .timestamps()
        .iter()
        .map(|ts| first_row.get(ts).copied())
        .collect();

    for name in input.column_names().difference(touched) {
        let Some(source) = input.column(name) else {
            continue;
        };
        let values = rows
            .iter()
            .map(|row| row.map_or(f64::NAN, |i| source[i]))
            .collect();
        series.insert_column(name.clone(), values)?;
    }
    Ok(series)
}
