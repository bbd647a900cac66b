//! HybridRetriever + RankFusion: fans a query out to both stores,
//! fuses by Reciprocal Rank Fusion. RRF structure adapted from the rank
//! fusion used by the pack's code-search retrieval layer, simplified to the
//! spec's unweighted two-source form.

use std::collections::HashMap;

use tracing::warn;

use crate::keyword_store::KeywordStore;
use crate::vector_store::{ChunkMetadata, VectorStore};

pub const DEFAULT_RRF_K: u32 = 60;

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub rrf_score: f32,
}

pub struct HybridRetriever<'a> {
    vector_store: &'a VectorStore,
    keyword_store: &'a KeywordStore,
    rrf_k: u32,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(vector_store: &'a VectorStore, keyword_store: &'a KeywordStore, rrf_k: u32) -> Self {
        Self { vector_store, keyword_store, rrf_k }
    }

    /// `retrieve(query_text, query_vector, max_results)`. Runs both stores,
    /// degrading to whichever succeeds if the other errors; two failures
    /// return empty.
    pub fn retrieve(&self, query_text: &str, query_vector: &[f32], max_results: usize) -> Vec<RetrievedChunk> {
        let vector_results = match self.vector_store.top_k(query_vector, max_results) {
            Ok(hits) => Some(hits.into_iter().map(|h| (h.metadata, h.text)).collect::<Vec<_>>()),
            Err(e) => {
                warn!(error = %e, "vector store query failed, degrading to keyword only");
                None
            }
        };
        let keyword_results = match self.keyword_store.top_k(query_text, max_results) {
            Ok(hits) => Some(hits.into_iter().map(|h| (h.metadata, h.text)).collect::<Vec<_>>()),
            Err(e) => {
                warn!(error = %e, "keyword store query failed, degrading to vector only");
                None
            }
        };

        match (vector_results, keyword_results) {
            (None, None) => Vec::new(),
            (Some(v), None) => take_unchanged(v, max_results),
            (None, Some(k)) => take_unchanged(k, max_results),
            (Some(v), Some(k)) if v.is_empty() && k.is_empty() => Vec::new(),
            (Some(v), Some(k)) if v.is_empty() => take_unchanged(k, max_results),
            (Some(v), Some(k)) if k.is_empty() => take_unchanged(v, max_results),
            (Some(v), Some(k)) => fuse(&v, &k, self.rrf_k, max_results),
        }
    }
}

fn take_unchanged(results: Vec<(ChunkMetadata, String)>, max_results: usize) -> Vec<RetrievedChunk> {
    results
        .into_iter()
        .take(max_results)
        .map(|(metadata, text)| RetrievedChunk { metadata, text, rrf_score: 0.0 })
        .collect()
}

/// Reciprocal Rank Fusion keyed by chunk text: for the i-th (0-based)
/// result of each list, add `1/(k + i + 1)`. Ties break by first-appearance
/// order, which `HashMap` iteration does not preserve on its own — insertion
/// order is tracked separately to keep fusion deterministic.
fn fuse(vector_results: &[(ChunkMetadata, String)], keyword_results: &[(ChunkMetadata, String)], k: u32, max_results: usize) -> Vec<RetrievedChunk> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut first_seen: HashMap<String, (usize, ChunkMetadata)> = HashMap::new();
    let mut order = 0usize;

    for (rank, (metadata, text)) in vector_results.iter().enumerate() {
        *scores.entry(text.clone()).or_insert(0.0) += 1.0 / (k as f32 + rank as f32 + 1.0);
        first_seen.entry(text.clone()).or_insert_with(|| {
            let o = order;
            order += 1;
            (o, metadata.clone())
        });
    }
    for (rank, (metadata, text)) in keyword_results.iter().enumerate() {
        *scores.entry(text.clone()).or_insert(0.0) += 1.0 / (k as f32 + rank as f32 + 1.0);
        first_seen.entry(text.clone()).or_insert_with(|| {
            let o = order;
            order += 1;
            (o, metadata.clone())
        });
    }

    let mut entries: Vec<(String, f32, usize, ChunkMetadata)> = scores
        .into_iter()
        .map(|(text, score)| {
            let (appearance_order, metadata) = first_seen.get(&text).cloned().unwrap();
            (text, score, appearance_order, metadata)
        })
        .collect();

    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.2.cmp(&b.2)));

    entries
        .into_iter()
        .take(max_results)
        .map(|(text, score, _, metadata)| RetrievedChunk { metadata, text, rrf_score: score })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> ChunkMetadata {
        ChunkMetadata {
            file_path: path.to_string(),
            file_name: path.to_string(),
            extension: "rs".to_string(),
            chunk_index: 0,
        }
    }

    #[test]
    fn fusing_a_list_with_itself_preserves_order() {
        let results = vec![
            (meta("/a.rs"), "alpha".to_string()),
            (meta("/b.rs"), "beta".to_string()),
            (meta("/c.rs"), "gamma".to_string()),
        ];
        let fused = fuse(&results, &results, DEFAULT_RRF_K, 10);
        let texts: Vec<&str> = fused.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn item_present_in_both_lists_outranks_single_list_item() {
        let vector_results = vec![(meta("/a.rs"), "alpha".to_string()), (meta("/b.rs"), "beta".to_string())];
        let keyword_results = vec![(meta("/b.rs"), "beta".to_string()), (meta("/c.rs"), "gamma".to_string())];
        let fused = fuse(&vector_results, &keyword_results, DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].text, "beta");
    }

    #[test]
    fn truncates_to_max_results() {
        let results = vec![(meta("/a.rs"), "alpha".to_string()), (meta("/b.rs"), "beta".to_string())];
        let fused = fuse(&results, &results, DEFAULT_RRF_K, 1);
        assert_eq!(fused.len(), 1);
    }
}
