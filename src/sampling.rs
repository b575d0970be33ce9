//! Chunk source
//!
//! This module turns one long series into a finite stream of analysis chunks
//! under one of several sampling policies:
//! - whole series (subsampling disabled)
//! - consecutive windows, sliding or anchored to the origin
//! - systematic picks of representative equal-size groups
//! - uniformly random windows

use crate::error::ErgoError;
use crate::types::{Chunk, ChunkInfo, ChunkOrigin, Series};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sampling configuration for the chunk source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Split the series into chunks at all
    pub use_subsampling: bool,
    /// Requested chunk count (consecutive policies yield as many as fit)
    pub number_of_chunks: usize,
    /// Rows per chunk
    pub chunk_size: usize,
    /// Draw chunk starts at random
    pub randomize: bool,
    /// Walk the series in non-overlapping consecutive windows; unset follows `!randomize`
    pub consecutive: Option<bool>,
    /// Start every consecutive window at row 0
    pub anchor_to_start: bool,
    /// Allow a shorter final consecutive window
    pub best_effort: bool,
    /// Seed for the random policy; unseeded draws are not reproducible
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            use_subsampling: false,
            number_of_chunks: 1,
            chunk_size: 0,
            randomize: false,
            consecutive: None,
            anchor_to_start: false,
            best_effort: false,
            seed: None,
        }
    }
}

impl SamplingConfig {
    /// Resolve the flag set into a single policy
    pub fn policy(&self) -> Result<SamplingPolicy, ErgoError> {
        if self.randomize && self.consecutive == Some(true) {
            return Err(ErgoError::Config(
                "random and consecutive sampling are mutually exclusive".to_string(),
            ));
        }
        if !self.use_subsampling {
            return Ok(SamplingPolicy::Whole);
        }
        if self.chunk_size == 0 || self.number_of_chunks == 0 {
            return Ok(SamplingPolicy::Empty);
        }
        if self.randomize {
            return Ok(SamplingPolicy::Random);
        }
        if self.is_consecutive() {
            return Ok(SamplingPolicy::Consecutive {
                anchor_to_start: self.anchor_to_start,
                best_effort: self.best_effort,
            });
        }
        Ok(SamplingPolicy::Systematic)
    }

    /// Consecutive walking, defaulting to on unless sampling is random
    pub fn is_consecutive(&self) -> bool {
        self.consecutive.unwrap_or(!self.randomize)
    }

    /// Whether two runs over the same series yield the same chunks
    pub fn is_reproducible(&self) -> bool {
        !(self.use_subsampling && self.randomize && self.seed.is_none())
    }
}

/// Resolved sampling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    Whole,
    Empty,
    Consecutive {
        anchor_to_start: bool,
        best_effort: bool,
    },
    Systematic,
    Random,
}

impl SamplingPolicy {
    fn origin(&self) -> ChunkOrigin {
        match self {
            SamplingPolicy::Whole => ChunkOrigin::Whole,
            SamplingPolicy::Empty => ChunkOrigin::Empty,
            SamplingPolicy::Consecutive {
                anchor_to_start: true,
                ..
            } => ChunkOrigin::Anchored,
            SamplingPolicy::Consecutive { .. } => ChunkOrigin::Consecutive,
            SamplingPolicy::Systematic => ChunkOrigin::Systematic,
            SamplingPolicy::Random => ChunkOrigin::Random,
        }
    }
}

/// Produces chunk streams from a series
#[derive(Debug, Clone)]
pub struct ChunkSource {
    config: SamplingConfig,
    policy: SamplingPolicy,
}

impl ChunkSource {
    /// Create a chunk source, rejecting contradictory configurations
    pub fn new(config: SamplingConfig) -> Result<Self, ErgoError> {
        let policy = config.policy()?;
        Ok(Self { config, policy })
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Lazily yield chunks of `series`.
    ///
    /// Each call re-plans the chunk ranges, so non-random policies restart
    /// deterministically and random policies re-draw (unless seeded).
    pub fn chunks<'a>(&self, series: Option<&'a Series>) -> Chunks<'a> {
        let origin = self.policy.origin();
        let Some(series) = series else {
            return Chunks {
                series: None,
                ranges: vec![(0, 0)].into_iter(),
                origin: ChunkOrigin::Whole,
                next_index: 0,
            };
        };

        let len = series.len();
        let ranges = match self.policy {
            SamplingPolicy::Whole => vec![(0, len)],
            SamplingPolicy::Empty => vec![(0, 0)],
            SamplingPolicy::Consecutive {
                anchor_to_start,
                best_effort,
            } => consecutive_ranges(len, self.config.chunk_size, anchor_to_start, best_effort),
            SamplingPolicy::Systematic => {
                systematic_ranges(len, self.config.chunk_size, self.config.number_of_chunks)
            }
            SamplingPolicy::Random => {
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                random_ranges(
                    len,
                    self.config.chunk_size,
                    self.config.number_of_chunks,
                    &mut rng,
                )
            }
        };

        debug!(
            policy = ?self.policy,
            rows = len,
            chunks = ranges.len(),
            "planned chunk ranges"
        );

        Chunks {
            series: Some(series),
            ranges: ranges.into_iter(),
            origin,
            next_index: 0,
        }
    }
}

/// Lazy chunk iterator returned by [`ChunkSource::chunks`]
#[derive(Debug)]
pub struct Chunks<'a> {
    series: Option<&'a Series>,
    ranges: std::vec::IntoIter<(usize, usize)>,
    origin: ChunkOrigin,
    next_index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let (start, end) = self.ranges.next()?;
        let info = ChunkInfo {
            index: self.next_index,
            start,
            end,
            origin: self.origin,
        };
        self.next_index += 1;
        Some(Chunk {
            data: self.series.map(|s| s.slice(start, end)),
            info,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranges.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Consecutive `[start, end)` ranges of `size` rows
fn consecutive_ranges(
    len: usize,
    size: usize,
    anchor_to_start: bool,
    best_effort: bool,
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(len / size + 1);
    let mut end = size;
    while end <= len {
        let start = if anchor_to_start { 0 } else { end - size };
        ranges.push((start, end));
        end += size;
    }

    let covered = ranges.last().map(|&(_, e)| e).unwrap_or(0);
    if best_effort && covered < len {
        let start = if anchor_to_start { 0 } else { covered };
        ranges.push((start, len));
    }
    ranges
}

/// Representative equal-size groups, one per requested chunk
fn systematic_ranges(len: usize, size: usize, requested: usize) -> Vec<(usize, usize)> {
    let groups = len / size;
    let base = groups / requested;
    let extra = groups % requested;

    let mut ranges = Vec::with_capacity(requested);
    let mut previous: Option<usize> = None;
    let mut first = 0;

    for bucket in 0..requested {
        let count = base + usize::from(bucket < extra);
        let pick = if count == 0 {
            // Empty bucket: reuse the last valid pick rather than failing
            previous
        } else {
            Some(first + (count - 1) / 2)
        };
        first += count;

        if let Some(group) = pick {
            ranges.push((group * size, (group + 1) * size));
            previous = Some(group);
        }
    }
    ranges
}

/// Random windows of `size` rows in draw order
fn random_ranges(
    len: usize,
    size: usize,
    requested: usize,
    rng: &mut StdRng,
) -> Vec<(usize, usize)> {
    if size > len {
        // Only one valid start exists: every draw is the whole series
        return vec![(0, len); requested];
    }

    let candidates = len - size + 1;
    let starts: Vec<usize> = if requested <= candidates {
        rand::seq::index::sample(rng, candidates, requested).into_vec()
    } else {
        warn!(
            requested,
            candidates, "more random chunks than distinct starts, drawing with replacement"
        );
        (0..requested).map(|_| rng.gen_range(0..candidates)).collect()
    };

    starts.into_iter().map(|s| (s, s + size)).collect()
}
