//! Query endpoint: classifies intent, fans out hybrid
//! retrieval across a project's knowledge sources, fuses per source, and
//! renders a citation-formatted prompt via `ContentInjector`.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classifier::{HistoryMessage, IntentClassifier};
use crate::content_injector::{CitationStyle, ContentInjector};
use crate::error::AppResult;
use crate::retriever::{HybridRetriever, RetrievedChunk};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    pub knowledge_sources: Option<Vec<String>>,
    #[serde(default)]
    pub citation_style: Option<String>,
    #[serde(default = "default_true")]
    pub classify_intent: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub used_retrieval: bool,
    pub prompt: String,
    pub chunks: Vec<ChunkDto>,
}

#[derive(Debug, Serialize)]
pub struct ChunkDto {
    pub file_path: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub rrf_score: f32,
}

fn parse_citation_style(raw: Option<&str>) -> CitationStyle {
    match raw.map(|s| s.to_lowercase()) {
        Some(ref s) if s == "detailed" => CitationStyle::Detailed,
        Some(ref s) if s == "compact" => CitationStyle::Compact,
        Some(ref s) if s == "minimal" => CitationStyle::Minimal,
        _ => CitationStyle::Compact,
    }
}

pub async fn query_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> AppResult<Json<QueryResponse>> {
    let project = state.registry.get_project(&project_id)?;

    let history: Vec<HistoryMessage> = req.history.into_iter().map(|t| HistoryMessage { role: t.role, content: t.content }).collect();

    let used_retrieval = if req.classify_intent {
        let classifier = IntentClassifier::new(state.classifier_client.as_ref(), state.config.classification_timeout_ms);
        classifier.should_use_rag(&req.question, &history).await
    } else {
        true
    };

    let injector = ContentInjector::new(parse_citation_style(req.citation_style.as_deref()));

    if !used_retrieval {
        let prompt = injector.build_prompt(&req.question, &[]);
        return Ok(Json(QueryResponse { used_retrieval: false, prompt, chunks: vec![] }));
    }

    let source_ids: Vec<String> = match &req.knowledge_sources {
        Some(ids) => ids.clone(),
        None => project.knowledge_sources.iter().map(|s| s.id().to_string()).collect(),
    };

    let mut all_chunks: Vec<RetrievedChunk> = Vec::new();
    for source_id in &source_ids {
        let coordinator = match state.registry.coordinator_for(&project_id, source_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, source_id, "skipping unavailable knowledge source during query");
                continue;
            }
        };

        let query_vector = match coordinator.embedder().embed(&req.question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, source_id, "query embedding failed, skipping knowledge source");
                continue;
            }
        };

        let retriever = HybridRetriever::new(coordinator.vector_store(), coordinator.keyword_store(), state.config.rrf_k);
        all_chunks.extend(retriever.retrieve(&req.question, &query_vector, state.config.max_results));
    }

    all_chunks.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal));
    all_chunks.truncate(state.config.max_results);

    let prompt = injector.build_prompt(&req.question, &all_chunks);
    let chunks = all_chunks
        .iter()
        .map(|c| ChunkDto {
            file_path: c.metadata.file_path.clone(),
            file_name: c.metadata.file_name.clone(),
            chunk_index: c.metadata.chunk_index,
            rrf_score: c.rrf_score,
        })
        .collect();

    Ok(Json(QueryResponse { used_retrieval: true, prompt, chunks }))
}
