//! Scoring engine
//!
//! Applies every enabled metric to each chunk's delta angles and collects the
//! results in a [`ScoreRecord`].

use super::activity::activity_score;
use super::aggregate::{aggregate, AggregatedScores};
use super::posture::posture_score;
use super::strain::strain_score;
use super::{Metric, ScoreRecord, ScoringConfig, GLOBAL_WIDTH};
use crate::error::ErgoError;
use crate::types::StructuredData;
use tracing::debug;

/// Computes windowed scores from structured data
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Result<Self, ErgoError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every chunk, keyed by chunk segment.
    ///
    /// A chunk missing a delta series is recorded as `None` for each metric;
    /// widths longer than the chunk are skipped.
    pub fn compute(&self, chunks: &[StructuredData]) -> Result<ScoreRecord, ErgoError> {
        let mut record = ScoreRecord::new();
        for data in chunks {
            self.score_chunk(data, &mut record)?;
        }
        Ok(record)
    }

    fn score_chunk(
        &self,
        data: &StructuredData,
        record: &mut ScoreRecord,
    ) -> Result<(), ErgoError> {
        let chunk = data.segment();
        let deltas = data.deltas();
        let complete = deltas.iter().all(Option::is_some);

        let activity = &self.config.activity;
        if activity.enabled {
            if !complete {
                record.insert(Metric::Activity, chunk, activity.widths[0], None);
            }
            for &width in activity.widths.iter().filter(|w| complete && **w <= data.len()) {
                let scores = activity_score(deltas, width, activity)?;
                record.insert(Metric::Activity, chunk, width, scores);
            }
        }

        let posture = &self.config.posture;
        if posture.enabled {
            if !complete {
                record.insert(Metric::Posture, chunk, posture.widths[0], None);
            }
            for &width in posture.widths.iter().filter(|w| complete && **w <= data.len()) {
                let scores = posture_score(deltas, width, posture)?;
                record.insert(Metric::Posture, chunk, width, scores);
            }
        }

        if self.config.strain.enabled {
            record.insert(
                Metric::Strain,
                chunk,
                GLOBAL_WIDTH,
                strain_score(deltas, &self.config.strain)?,
            );
        }

        debug!(chunk, rows = data.len(), complete, "scored chunk");
        Ok(())
    }

    /// Reduce a score record with the configured reducers
    pub fn aggregate(&self, record: &ScoreRecord) -> Result<AggregatedScores, ErgoError> {
        aggregate(record, &self.config.aggregation)
    }
}
