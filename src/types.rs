//! Core types for the Ergo Flux pipeline
//!
//! This module defines the data structures that flow through the pipeline: the
//! columnar orientation series, the chunks drawn from it, the change descriptors
//! emitted by stages, and the immutable structured data handed to scoring.

use crate::error::ErgoError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Orientation axis of a sensor board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Yaw,
    Pitch,
    Roll,
}

impl Axis {
    /// All axes in canonical order
    pub const ALL: [Axis; 3] = [Axis::Yaw, Axis::Pitch, Axis::Roll];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Yaw => "yaw",
            Axis::Pitch => "pitch",
            Axis::Roll => "roll",
        }
    }

    /// Name of the derived delta-angle column for this axis
    pub fn delta_column(&self) -> String {
        format!("delta_{}", self.as_str())
    }

    /// Name of a raw channel column for a board, e.g. `hand_yaw`
    pub fn board_column(&self, board: &str) -> String {
        format!("{board}_{}", self.as_str())
    }
}

impl std::str::FromStr for Axis {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaw" => Ok(Axis::Yaw),
            "pitch" => Ok(Axis::Pitch),
            "roll" => Ok(Axis::Roll),
            other => Err(ErgoError::Config(format!("unknown axis '{other}'"))),
        }
    }
}

/// Default sensor board names (hand board minus wrist board)
pub const HAND_BOARD: &str = "hand";
pub const WRIST_BOARD: &str = "wrist";

/// Raw yaw/pitch/roll channel names for both boards
pub fn raw_channel_names() -> Vec<String> {
    [HAND_BOARD, WRIST_BOARD]
        .iter()
        .flat_map(|board| Axis::ALL.iter().map(move |axis| axis.board_column(board)))
        .collect()
}

/// Delta-angle column names in axis order
pub fn delta_column_names() -> Vec<String> {
    Axis::ALL.iter().map(Axis::delta_column).collect()
}

/// Time-indexed table of numeric channels.
///
/// Every column has exactly one value per timestamp. Missing readings are `NaN`
/// in memory and serialize as `null`; infinities serialize as `"inf"`/`"-inf"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    timestamps: Vec<DateTime<Utc>>,
    #[serde(with = "nullable_columns")]
    columns: BTreeMap<String, Vec<f64>>,
}

impl Series {
    /// Create a series with the given timestamps and no columns
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column insertion
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, ErgoError> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// Insert or replace a column; its length must match the timestamps
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), ErgoError> {
        let name = name.into();
        if values.len() != self.timestamps.len() {
            return Err(ErgoError::LengthMismatch {
                column: name,
                expected: self.timestamps.len(),
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Build a series from row records, filling absent channels with `NaN`
    pub fn from_records(records: Vec<SeriesRecord>) -> Result<Self, ErgoError> {
        let names: BTreeSet<String> = records
            .iter()
            .flat_map(|r| r.channels.keys().cloned())
            .collect();

        let mut columns: BTreeMap<String, Vec<f64>> = names
            .iter()
            .map(|n| (n.clone(), Vec::with_capacity(records.len())))
            .collect();
        let mut timestamps = Vec::with_capacity(records.len());

        for record in records {
            timestamps.push(record.timestamp);
            for (name, values) in columns.iter_mut() {
                let value = record.channels.get(name).copied().flatten();
                values.push(value.unwrap_or(f64::NAN));
            }
        }

        Ok(Self {
            timestamps,
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Mutable access to a column's values (length is fixed)
    pub fn column_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        self.columns.get_mut(name).map(Vec::as_mut_slice)
    }

    /// Column lookup that fails with `MissingColumn`
    pub fn require_column(&self, name: &str) -> Result<&[f64], ErgoError> {
        self.column(name)
            .ok_or_else(|| ErgoError::MissingColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.keys().cloned().collect()
    }

    /// Contiguous row range `[start, end)`, clamped to the series length
    pub fn slice(&self, start: usize, end: usize) -> Series {
        let end = end.min(self.len());
        let start = start.min(end);
        Series {
            timestamps: self.timestamps[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), values[start..end].to_vec()))
                .collect(),
        }
    }

    /// Rows at the given indices, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Series {
        Series {
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), indices.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }

    /// Stable sort of all rows by timestamp
    pub fn sorted_by_timestamp(&self) -> Series {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        self.select_rows(&order)
    }

    /// Drop rows whose timestamp was already seen, keeping the first occurrence
    pub fn dedup_timestamps(&self) -> Series {
        let mut seen = HashSet::with_capacity(self.len());
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| seen.insert(self.timestamps[i]))
            .collect();
        if keep.len() == self.len() {
            return self.clone();
        }
        self.select_rows(&keep)
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] < w[1])
    }
}

/// One row of raw input as handed over by a data loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub channels: BTreeMap<String, Option<f64>>,
}

/// Sampling policy a chunk was drawn under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrigin {
    Whole,
    Empty,
    Consecutive,
    Anchored,
    Systematic,
    Random,
}

/// Lineage of a chunk within its source series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Position in the chunk stream
    pub index: usize,
    /// First row (inclusive) in the source series
    pub start: usize,
    /// Last row (exclusive) in the source series
    pub end: usize,
    pub origin: ChunkOrigin,
}

/// One analysis window drawn from a series
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `None` when the source series itself was absent
    pub data: Option<Series>,
    pub info: ChunkInfo,
}

/// Columns a stage added, updated or removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub added: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeDescriptor {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn added<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            added: columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn updated<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            updated: columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Columns whose content now comes from the pipeline
    pub fn touched(&self) -> BTreeSet<String> {
        self.added.union(&self.updated).cloned().collect()
    }
}

/// Immutable per-chunk delta-angle record consumed by the scoring engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    device_id: String,
    segment: usize,
    info: ChunkInfo,
    timestamps: Vec<DateTime<Utc>>,
    #[serde(with = "nullable_series")]
    delta_yaw: Option<Vec<f64>>,
    #[serde(with = "nullable_series")]
    delta_pitch: Option<Vec<f64>>,
    #[serde(with = "nullable_series")]
    delta_roll: Option<Vec<f64>>,
}

impl StructuredData {
    /// Create a record from per-axis deltas in `[yaw, pitch, roll]` order
    pub fn new(
        device_id: impl Into<String>,
        info: ChunkInfo,
        timestamps: Vec<DateTime<Utc>>,
        deltas: [Option<Vec<f64>>; 3],
    ) -> Self {
        let [delta_yaw, delta_pitch, delta_roll] = deltas;
        Self {
            device_id: device_id.into(),
            segment: info.index,
            info,
            timestamps,
            delta_yaw,
            delta_pitch,
            delta_roll,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn info(&self) -> &ChunkInfo {
        &self.info
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    pub fn delta(&self, axis: Axis) -> Option<&[f64]> {
        match axis {
            Axis::Yaw => self.delta_yaw.as_deref(),
            Axis::Pitch => self.delta_pitch.as_deref(),
            Axis::Roll => self.delta_roll.as_deref(),
        }
    }

    /// All three deltas in axis order
    pub fn deltas(&self) -> [Option<&[f64]>; 3] {
        [
            self.delta(Axis::Yaw),
            self.delta(Axis::Pitch),
            self.delta(Axis::Roll),
        ]
    }
}

/// One sample on the wire; missing samples are `null`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireSample {
    Finite(f64),
    /// `"inf"` or `"-inf"`, which JSON numbers cannot carry
    Infinite(String),
}

fn to_nullable(values: &[f64]) -> Vec<Option<WireSample>> {
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                None
            } else if v.is_infinite() {
                let text = if v > 0.0 { "inf" } else { "-inf" };
                Some(WireSample::Infinite(text.to_string()))
            } else {
                Some(WireSample::Finite(v))
            }
        })
        .collect()
}

fn from_nullable<E: serde::de::Error>(values: Vec<Option<WireSample>>) -> Result<Vec<f64>, E> {
    values
        .into_iter()
        .map(|sample| match sample {
            None => Ok(f64::NAN),
            Some(WireSample::Finite(v)) => Ok(v),
            Some(WireSample::Infinite(text)) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::custom(format!("invalid sample '{other}'"))),
            },
        })
        .collect()
}

mod nullable_columns {
    use super::WireSample;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        columns: &BTreeMap<String, Vec<f64>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let view: BTreeMap<&str, Vec<Option<WireSample>>> = columns
            .iter()
            .map(|(name, values)| (name.as_str(), super::to_nullable(values)))
            .collect();
        view.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<f64>>, D::Error> {
        let raw = BTreeMap::<String, Vec<Option<WireSample>>>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, values)| Ok((name, super::from_nullable(values)?)))
            .collect()
    }
}

mod nullable_series {
    use super::WireSample;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        values: &Option<Vec<f64>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        values
            .as_deref()
            .map(super::to_nullable)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<f64>>, D::Error> {
        let raw = Option::<Vec<Option<WireSample>>>::deserialize(deserializer)?;
        raw.map(super::from_nullable).transpose()
    }
}
