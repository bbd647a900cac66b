//! HybridIndexer: writes one file's chunks into both the VectorStore and
//! KeywordStore atomically at chunk granularity. Ordering
//! between the two stores for a given chunk is vector-then-keyword; on
//! failure of either write, the whole batch is marked failed and the
//! coordinator must not mutate StateRepository for the affected file.

use crate::error::{AppError, AppResult};
use crate::keyword_store::{ChunkToIndex, KeywordStore};
use crate::vector_store::{ChunkMetadata, VectorStore};

pub struct EmbeddedSegment {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub vector: Vec<f32>,
    pub symbols: String,
}

pub struct HybridIndexer<'a> {
    vector_store: &'a VectorStore,
    keyword_store: &'a KeywordStore,
}

impl<'a> HybridIndexer<'a> {
    pub fn new(vector_store: &'a VectorStore, keyword_store: &'a KeywordStore) -> Self {
        Self { vector_store, keyword_store }
    }

    /// `index_segments(segments)`: returns only after both stores have
    /// durably committed. Chunks within a single file are written in
    /// ascending `chunk_index` — callers are expected to hand segments in
    /// that order; this function does not re-sort them, since reordering
    /// silently would hide a caller bug.
    pub async fn index_segments(&self, segments: &[EmbeddedSegment]) -> AppResult<()> {
        if segments.is_empty() {
            return Ok(());
        }

        for pair in segments.windows(2) {
            debug_assert!(pair[0].metadata.chunk_index <= pair[1].metadata.chunk_index);
        }

        // Vector-then-keyword: the vector side is written first so that a
        // keyword-only failure never leaves a vector entry without the
        // authoritative keyword-side record backing it. Keyword-store is
        // the authoritative removal path, so it commits last.
        let mut added_vector_keys = Vec::with_capacity(segments.len());
        for segment in segments {
            match self.vector_store.add(&segment.vector, segment.metadata.clone(), segment.text.clone()) {
                Ok(key) => added_vector_keys.push(key),
                Err(e) => {
                    self.rollback_vector_keys(&added_vector_keys);
                    return Err(e);
                }
            }
        }

        let keyword_docs: Vec<ChunkToIndex> = segments
            .iter()
            .map(|s| ChunkToIndex {
                metadata: s.metadata.clone(),
                text: s.text.clone(),
                symbols: s.symbols.clone(),
            })
            .collect();

        if let Err(e) = self.keyword_store.add_chunks(&keyword_docs).await {
            self.rollback_vector_keys(&added_vector_keys);
            return Err(AppError::StoreWriteError(format!("keyword commit failed, batch rolled back: {}", e)));
        }

        self.vector_store.save()?;
        Ok(())
    }

    /// Compensation when the keyword commit fails after the vector side
    /// already succeeded: actually removes the keys just added, so a
    /// failed batch leaves neither store populated (I2 governs the add
    /// path too, not just deletes). A key that fails to remove is logged;
    /// StateRepository is never updated for this batch either way, so a
    /// future pass will reprocess the file.
    fn rollback_vector_keys(&self, keys: &[u64]) {
        for &key in keys {
            if let Err(e) = self.vector_store.remove_key(key) {
                tracing::warn!(key, error = %e, "failed to roll back vector entry after keyword commit failure");
            }
        }
        if let Err(e) = self.vector_store.save() {
            tracing::warn!(error = %e, "failed to persist vector store after rollback");
        }
    }

    pub async fn remove_file(&self, file_path: &str) -> AppResult<()> {
        // Keyword removal is authoritative; vector removal is best-effort.
        self.keyword_store.delete_by_file_path(file_path).await?;
        let removed = self.vector_store.delete_by_file_path(file_path);
        if removed == 0 {
            tracing::debug!(file_path, "no vectors removed (none present or unsupported)");
        } else if let Err(e) = self.vector_store.save() {
            // Best-effort: the in-memory removal already happened, so reads
            // within this process see it. A failed flush just means a
            // restart could resurrect the orphaned vector, which I4 already
            // tolerates.
            tracing::warn!(file_path, error = %e, "failed to persist vector store after removal");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str, idx: usize) -> ChunkMetadata {
        ChunkMetadata {
            file_path: path.to_string(),
            file_name: path.to_string(),
            extension: "txt".to_string(),
            chunk_index: idx,
        }
    }

    #[tokio::test]
    async fn index_segments_writes_to_both_stores() {
        let vdir = tempfile::tempdir().unwrap();
        let kdir = tempfile::tempdir().unwrap();
        let vector_store = VectorStore::open(vdir.path(), 4).unwrap();
        let keyword_store = KeywordStore::open(kdir.path()).unwrap();
        let indexer = HybridIndexer::new(&vector_store, &keyword_store);

        let segments = vec![EmbeddedSegment {
            metadata: meta("/p/a.txt", 0),
            text: "hello world".to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            symbols: String::new(),
        }];

        indexer.index_segments(&segments).await.unwrap();
        assert_eq!(vector_store.len(), 1);
        assert_eq!(keyword_store.document_count(), 1);
    }

    #[tokio::test]
    async fn rollback_vector_keys_actually_removes_the_vectors() {
        let vdir = tempfile::tempdir().unwrap();
        let kdir = tempfile::tempdir().unwrap();
        let vector_store = VectorStore::open(vdir.path(), 4).unwrap();
        let keyword_store = KeywordStore::open(kdir.path()).unwrap();
        let indexer = HybridIndexer::new(&vector_store, &keyword_store);

        let key = vector_store.add(&[1.0, 0.0, 0.0, 0.0], meta("/p/a.txt", 0), "hello".to_string()).unwrap();
        assert_eq!(vector_store.len(), 1);

        indexer.rollback_vector_keys(&[key]);
        assert_eq!(vector_store.len(), 0, "a rolled-back batch must leave no orphan vectors behind");
    }

    #[tokio::test]
    async fn remove_file_clears_both_stores() {
        let vdir = tempfile::tempdir().unwrap();
        let kdir = tempfile::tempdir().unwrap();
        let vector_store = VectorStore::open(vdir.path(), 4).unwrap();
        let keyword_store = KeywordStore::open(kdir.path()).unwrap();
        let indexer = HybridIndexer::new(&vector_store, &keyword_store);

        let segments = vec![EmbeddedSegment {
            metadata: meta("/p/a.txt", 0),
            text: "hello world".to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            symbols: String::new(),
        }];
        indexer.index_segments(&segments).await.unwrap();
        indexer.remove_file("/p/a.txt").await.unwrap();

        assert_eq!(vector_store.len(), 0);
        assert_eq!(keyword_store.document_count(), 0);
    }
}
