//! VectorStore: persistent dense-vector index keyed by opaque id, backed by
//! `usearch`'s HNSW implementation. Supports add,
//! top-k by cosine, and best-effort delete-by-metadata-filter — orphan
//! vectors after a delete are acceptable because queries reach the vector
//! store only after the keyword side has already confirmed the `file_path`
//! is still live.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub file_name: String,
    pub extension: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub score: f32,
}

struct StoredChunk {
    metadata: ChunkMetadata,
    text: String,
}

pub struct VectorStore {
    index: RwLock<usearch::Index>,
    metadata: RwLock<HashMap<u64, StoredChunk>>,
    next_key: AtomicU64,
    index_path: PathBuf,
    meta_path: PathBuf,
    dimension: usize,
}

impl VectorStore {
    pub fn open(dir: &Path, dimension: usize) -> AppResult<Self> {
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join("index.usearch");
        let meta_path = dir.join("metadata.json");

        let options = IndexOptions {
            dimensions: dimension,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F16,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };

        let index = usearch::Index::new(&options).map_err(|e| AppError::IndexError(format!("failed to create vector index: {}", e)))?;

        let (metadata, next_key) = if index_path.exists() && meta_path.exists() {
            match index.load(index_path.to_string_lossy().as_ref()) {
                Ok(()) => {
                    let json = std::fs::read_to_string(&meta_path).unwrap_or_default();
                    let meta: HashMap<u64, (ChunkMetadata, String)> = serde_json::from_str(&json).unwrap_or_default();
                    let max_key = meta.keys().copied().max().unwrap_or(0);
                    let meta = meta
                        .into_iter()
                        .map(|(k, (metadata, text))| (k, StoredChunk { metadata, text }))
                        .collect();
                    (meta, max_key + 1)
                }
                Err(_) => {
                    index.reserve(65536).map_err(|e| AppError::IndexError(e.to_string()))?;
                    (HashMap::new(), 0)
                }
            }
        } else {
            index.reserve(65536).map_err(|e| AppError::IndexError(e.to_string()))?;
            (HashMap::new(), 0)
        };

        Ok(Self {
            index: RwLock::new(index),
            metadata: RwLock::new(metadata),
            next_key: AtomicU64::new(next_key),
            index_path,
            meta_path,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn add(&self, vector: &[f32], metadata: ChunkMetadata, text: String) -> AppResult<u64> {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        let index = self.index.read();
        if index.size() + 1 >= index.capacity() {
            let _ = index.reserve((index.capacity() * 2).max(1024));
        }
        index
            .add(key, vector)
            .map_err(|e| AppError::StoreWriteError(format!("vector add failed: {}", e)))?;
        self.metadata.write().insert(key, StoredChunk { metadata, text });
        Ok(key)
    }

    pub fn top_k(&self, query: &[f32], k: usize) -> AppResult<Vec<VectorHit>> {
        let index = self.index.read();
        if index.size() == 0 {
            return Ok(Vec::new());
        }
        let result = index.search(query, k).map_err(|e| AppError::SearchError(format!("vector search failed: {}", e)))?;
        let metadata = self.metadata.read();
        let mut hits = Vec::with_capacity(result.keys.len());
        for (key, distance) in result.keys.iter().zip(result.distances.iter()) {
            if let Some(stored) = metadata.get(key) {
                hits.push(VectorHit {
                    metadata: stored.metadata.clone(),
                    text: stored.text.clone(),
                    score: 1.0 - distance,
                });
            }
        }
        Ok(hits)
    }

    /// Removes a single vector by its opaque key, used to roll back an
    /// add when a later step in the same batch fails. Unlike
    /// `delete_by_file_path` this is not tolerated as best-effort by its
    /// caller: `HybridIndexer` treats a failure here as still needing to be
    /// logged, since an orphaned vector from a half-committed batch is
    /// exactly what I2 forbids.
    pub fn remove_key(&self, key: u64) -> AppResult<()> {
        let index = self.index.read();
        index.remove(key).map_err(|e| AppError::StoreWriteError(format!("vector remove failed: {}", e)))?;
        self.metadata.write().remove(&key);
        Ok(())
    }

    /// Best-effort delete-by-file_path: removes every vector whose
    /// metadata matches `file_path`. Failure to remove an individual key is
    /// logged upstream as `StoreRemoveUnsupported` and never fails the
    /// containing batch.
    pub fn delete_by_file_path(&self, file_path: &str) -> usize {
        let keys: Vec<u64> = {
            let metadata = self.metadata.read();
            metadata
                .iter()
                .filter(|(_, v)| v.metadata.file_path == file_path)
                .map(|(k, _)| *k)
                .collect()
        };
        let index = self.index.read();
        let mut removed = 0;
        let mut metadata = self.metadata.write();
        for key in keys {
            if index.remove(key).is_ok() {
                metadata.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn save(&self) -> AppResult<()> {
        let index = self.index.read();
        index
            .save(self.index_path.to_string_lossy().as_ref())
            .map_err(|e| AppError::StoreWriteError(format!("failed to save vector index: {}", e)))?;

        let metadata = self.metadata.read();
        let serializable: HashMap<u64, (ChunkMetadata, String)> =
            metadata.iter().map(|(k, v)| (*k, (v.metadata.clone(), v.text.clone()))).collect();
        let json = serde_json::to_string(&serializable)?;
        std::fs::write(&self.meta_path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.metadata.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> ChunkMetadata {
        ChunkMetadata {
            file_path: path.to_string(),
            file_name: path.to_string(),
            extension: "txt".to_string(),
            chunk_index: 0,
        }
    }

    #[test]
    fn add_and_top_k_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), 4).unwrap();
        store.add(&[1.0, 0.0, 0.0, 0.0], meta("/p/a.txt"), "hello".to_string()).unwrap();
        store.add(&[0.0, 1.0, 0.0, 0.0], meta("/p/b.txt"), "world".to_string()).unwrap();

        let hits = store.top_k(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.file_path, "/p/a.txt");
    }

    #[test]
    fn delete_by_file_path_removes_matching_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), 4).unwrap();
        store.add(&[1.0, 0.0, 0.0, 0.0], meta("/p/a.txt"), "hello".to_string()).unwrap();
        store.add(&[0.0, 1.0, 0.0, 0.0], meta("/p/b.txt"), "world".to_string()).unwrap();

        let removed = store.delete_by_file_path("/p/a.txt");
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_key_drops_a_single_vector() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), 4).unwrap();
        let key_a = store.add(&[1.0, 0.0, 0.0, 0.0], meta("/p/a.txt"), "hello".to_string()).unwrap();
        store.add(&[0.0, 1.0, 0.0, 0.0], meta("/p/b.txt"), "world".to_string()).unwrap();

        store.remove_key(key_a).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.top_k(&[1.0, 0.0, 0.0, 0.0], 2).unwrap()[0].metadata.file_path, "/p/b.txt");
    }

    #[test]
    fn empty_store_returns_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), 4).unwrap();
        assert!(store.top_k(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path(), 4).unwrap();
            store.add(&[1.0, 0.0, 0.0, 0.0], meta("/p/a.txt"), "hello".to_string()).unwrap();
            store.save().unwrap();
        }
        let reopened = VectorStore::open(dir.path(), 4).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
