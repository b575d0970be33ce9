//! End-to-end processing
//!
//! [`ErgoProcessor`] wires the chunk source, pipeline, scoring engine and
//! report builder from one [`ErgoConfig`].

use crate::cache::ResultCache;
use crate::config::ErgoConfig;
use crate::error::ErgoError;
use crate::pipeline::Pipeline;
use crate::report::{Report, ReportBuilder};
use crate::scoring::{ScoreRecord, ScoringEngine};
use crate::stages::StageRegistry;
use crate::types::Series;
use tracing::info;

/// Stateful processor holding a configured pipeline and its cache.
///
/// Reuse one processor across runs so cache hits skip the pipeline.
#[derive(Debug)]
pub struct ErgoProcessor {
    config: ErgoConfig,
    pipeline: Pipeline,
    engine: ScoringEngine,
    reports: ReportBuilder,
}

impl ErgoProcessor {
    /// Build a processor from the built-in stage registry
    pub fn new(config: ErgoConfig) -> Result<Self, ErgoError> {
        Self::with_registry(config, &StageRegistry::builtin())
    }

    pub fn with_registry(config: ErgoConfig, registry: &StageRegistry) -> Result<Self, ErgoError> {
        config.validate()?;
        let pipeline = Pipeline::from_config(config.sampling.clone(), &config.pipeline, registry)?;
        let engine = ScoringEngine::new(config.scoring.clone())?;
        let reports = ReportBuilder::new(config.report.clone());
        Ok(Self {
            config,
            pipeline,
            engine,
            reports,
        })
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.pipeline.set_cache(Some(cache));
        self
    }

    pub fn config(&self) -> &ErgoConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Run the pipeline and score every chunk without aggregating
    pub fn score(&mut self, series: Option<&Series>) -> Result<ScoreRecord, ErgoError> {
        let run = self.pipeline.run(series)?;
        self.engine.compute(&run.data)
    }

    /// Run the pipeline, score, aggregate and build a report
    pub fn process(&mut self, series: Option<&Series>) -> Result<Report, ErgoError> {
        let run = self.pipeline.run(series)?;
        let record = self.engine.compute(&run.data)?;
        let aggregated = self.engine.aggregate(&record)?;

        let mut report = self.reports.build(&run.data, &aggregated);
        if report.device_id.is_empty() {
            report.device_id = self.config.pipeline.device_id.clone();
        }
        report.from_cache = run.from_cache;

        info!(
            report_id = %report.report_id,
            chunks = report.chunk_count,
            from_cache = report.from_cache,
            "report built"
        );
        Ok(report)
    }
}

/// One-shot convenience: process `series` with `config` and no cache
pub fn score_series(series: &Series, config: &ErgoConfig) -> Result<Report, ErgoError> {
    ErgoProcessor::new(config.clone())?.process(Some(series))
}
