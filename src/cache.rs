//! Content-addressed result cache
//!
//! Pipeline results are stored under a SHA-256 key derived from the pipeline
//! configuration, the software revision and the input. Backends only need to
//! offer head/get/put/delete by opaque key; the cache never inspects the bytes
//! beyond (de)serializing its own result type.

use crate::error::ErgoError;
use crate::types::{Series, StructuredData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata stored alongside each cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub revision: String,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub stage_kinds: Vec<String>,
}

/// Object store backend addressed by opaque keys
pub trait ObjectStore {
    /// Cheap existence probe
    fn head(&self, key: &str) -> Result<bool, ErgoError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ErgoError>;

    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, ErgoError>;

    fn put(&mut self, key: &str, data: &[u8], metadata: &CacheMetadata) -> Result<(), ErgoError>;

    /// Remove an entry; returns whether it existed
    fn delete(&mut self, key: &str) -> Result<bool, ErgoError>;
}

/// In-process store, mostly useful for tests and one-shot jobs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, (Vec<u8>, CacheMetadata)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn head(&self, key: &str) -> Result<bool, ErgoError> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ErgoError> {
        Ok(self.entries.get(key).map(|(data, _)| data.clone()))
    }

    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, ErgoError> {
        Ok(self.entries.get(key).map(|(_, meta)| meta.clone()))
    }

    fn put(&mut self, key: &str, data: &[u8], metadata: &CacheMetadata) -> Result<(), ErgoError> {
        self.entries
            .insert(key.to_string(), (data.to_vec(), metadata.clone()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, ErgoError> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Directory-backed store: `<key>.json` data plus `<key>.meta.json` metadata
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ErgoError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, key: &str) -> Result<(PathBuf, PathBuf), ErgoError> {
        let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if key.is_empty() || !key.chars().all(valid) {
            return Err(ErgoError::Cache(format!("invalid cache key '{key}'")));
        }
        Ok((
            self.root.join(format!("{key}.json")),
            self.root.join(format!("{key}.meta.json")),
        ))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ErgoError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ObjectStore for FileStore {
    fn head(&self, key: &str) -> Result<bool, ErgoError> {
        let (data, _) = self.paths(key)?;
        Ok(data.is_file())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ErgoError> {
        let (data, _) = self.paths(key)?;
        read_optional(&data)
    }

    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, ErgoError> {
        let (_, meta) = self.paths(key)?;
        match read_optional(&meta)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &str, data: &[u8], metadata: &CacheMetadata) -> Result<(), ErgoError> {
        let (data_path, meta_path) = self.paths(key)?;
        fs::write(&meta_path, serde_json::to_vec_pretty(metadata)?)?;
        fs::write(&data_path, data)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, ErgoError> {
        let (data, meta) = self.paths(key)?;
        let existed = data.is_file();
        for path in [data, meta] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }
}

/// Result cache over an object store.
///
/// Read and write failures degrade to cache misses; only `delete` surfaces
/// backend errors.
pub struct ResultCache {
    store: Box<dyn ObjectStore>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}

impl ResultCache {
    pub fn new(store: impl ObjectStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.head(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "cache probe failed, treating as miss");
            false
        })
    }

    /// Stored result for `key`, or `None` on miss or unreadable entry
    pub fn get(&self, key: &str) -> Option<Vec<StructuredData>> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key, error = %e, "cached result is unreadable, treating as miss");
                None
            }
        }
    }

    pub fn metadata(&self, key: &str) -> Option<CacheMetadata> {
        self.store.metadata(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "cache metadata read failed");
            None
        })
    }

    /// Store a result; returns whether the write succeeded
    pub fn put(&mut self, key: &str, result: &[StructuredData], metadata: &CacheMetadata) -> bool {
        let write = serde_json::to_vec(result)
            .map_err(ErgoError::from)
            .and_then(|bytes| self.store.put(key, &bytes, metadata));
        match write {
            Ok(()) => {
                debug!(key, chunks = result.len(), "stored pipeline result");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<bool, ErgoError> {
        self.store.delete(key)
    }
}

/// Hex SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of a value's canonical JSON encoding
pub fn hash_json<T: Serialize>(value: &T) -> Result<String, ErgoError> {
    let encoded = serde_json::to_vec(value)?;
    Ok(sha256_hex(&encoded))
}

/// Fingerprint of an input series (`"none"` when absent)
pub fn fingerprint_series(series: Option<&Series>) -> Result<String, ErgoError> {
    match series {
        Some(series) => hash_json(series),
        None => Ok("none".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{timestamps, two_board_series};
    use crate::types::{ChunkInfo, ChunkOrigin};
    use pretty_assertions::assert_eq;

    fn sample_result() -> Vec<StructuredData> {
        let info = ChunkInfo {
            index: 0,
            start: 0,
            end: 3,
            origin: ChunkOrigin::Whole,
        };
        vec![StructuredData::new(
            "dev",
            info,
            timestamps(3),
            [Some(vec![1.0, 2.0, 3.0]), Some(vec![f64::NAN, 0.0, 0.0]), None],
        )]
    }

    fn metadata() -> CacheMetadata {
        CacheMetadata {
            revision: "test".to_string(),
            created_at: Utc::now(),
            chunk_count: 1,
            stage_kinds: vec!["delta_angles".to_string()],
        }
    }

    #[test]
    fn test_memory_cache_lifecycle() {
        let mut cache = ResultCache::in_memory();
        assert!(!cache.exists("abc"));
        assert!(cache.get("abc").is_none());

        assert!(cache.put("abc", &sample_result(), &metadata()));
        assert!(cache.exists("abc"));

        let loaded = cache.get("abc").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].delta(crate::types::Axis::Yaw), Some(&[1.0, 2.0, 3.0][..]));
        assert!(loaded[0].delta(crate::types::Axis::Pitch).unwrap()[0].is_nan());
        assert!(loaded[0].delta(crate::types::Axis::Roll).is_none());
        assert_eq!(cache.metadata("abc").unwrap().chunk_count, 1);

        assert!(cache.delete("abc").unwrap());
        assert!(!cache.exists("abc"));
        assert!(!cache.delete("abc").unwrap());
    }

    #[test]
    fn test_cached_infinite_delta_still_out_of_range() {
        use crate::scoring::strain::{strain_score, StrainConfig};
        use crate::types::Axis;

        let info = ChunkInfo {
            index: 0,
            start: 0,
            end: 2,
            origin: ChunkOrigin::Whole,
        };
        let spiky = vec![0.0, f64::INFINITY];
        let deltas = [Some(spiky.clone()), Some(spiky.clone()), Some(spiky)];
        let data = StructuredData::new("dev", info, timestamps(2), deltas);

        let mut cache = ResultCache::in_memory();
        assert!(cache.put("spiky", &[data.clone()], &metadata()));
        let loaded = cache.get("spiky").unwrap();
        assert_eq!(loaded[0].delta(Axis::Yaw).unwrap()[1], f64::INFINITY);

        let config = StrainConfig::default();
        assert!(matches!(strain_score(data.deltas(), &config), Err(ErgoError::OutOfRange { .. })));
        assert!(matches!(
            strain_score(loaded[0].deltas(), &config),
            Err(ErgoError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_file_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache")).unwrap();
        let mut cache = ResultCache::new(store.clone());

        assert!(cache.put("k1", &sample_result(), &metadata()));
        assert!(store.root().join("k1.json").is_file());
        assert!(store.root().join("k1.meta.json").is_file());
        assert!(cache.exists("k1"));
        assert_eq!(cache.get("k1").unwrap()[0].len(), 3);
        assert_eq!(cache.metadata("k1").unwrap().revision, "test");

        assert!(cache.delete("k1").unwrap());
        assert!(!store.root().join("k1.meta.json").exists());
        assert!(!cache.exists("k1"));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let mut store = MemoryStore::new();
        store.put("bad", b"not json", &metadata()).unwrap();
        let cache = ResultCache::new(store);
        assert!(cache.exists("bad"));
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(store.head("../escape"), Err(ErgoError::Cache(_))));

        // Through the cache the error degrades to a miss
        let cache = ResultCache::new(store);
        assert!(!cache.exists("../escape"));
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a = fingerprint_series(Some(&two_board_series(4))).unwrap();
        let b = fingerprint_series(Some(&two_board_series(5))).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint_series(Some(&two_board_series(4))).unwrap());
        assert_eq!(fingerprint_series(None).unwrap(), "none");
    }
}
