//! Project/knowledge-source CRUD and indexing control. Each handler is a
//! thin wrapper over `Registry`.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::events::IndexerCommand;
use crate::project::{IndexProgress, KnowledgeSource, Project};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub display_name: String,
}

pub async fn create_project(State(state): State<AppState>, Json(req): Json<CreateProjectRequest>) -> AppResult<Json<Project>> {
    let project = state.registry.create_project(&req.display_name)?;
    Ok(Json(project))
}

pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.registry.list_projects())
}

pub async fn get_project(State(state): State<AppState>, Path(project_id): Path<String>) -> AppResult<Json<Project>> {
    Ok(Json(state.registry.get_project(&project_id)?))
}

pub async fn remove_project(State(state): State<AppState>, Path(project_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    state.registry.dispatch(IndexerCommand::ProjectDeleted { project_id }).await?;
    Ok(Json(serde_json::json!({ "status": "removed" })))
}

#[derive(Debug, Deserialize)]
pub struct AddKnowledgeSourceRequest {
    pub absolute_path: String,
}

pub async fn add_knowledge_source(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<AddKnowledgeSourceRequest>,
) -> AppResult<Json<KnowledgeSource>> {
    let source = state.registry.add_knowledge_source(&project_id, &req.absolute_path)?;
    Ok(Json(source))
}

pub async fn remove_knowledge_source(
    State(state): State<AppState>,
    Path((project_id, knowledge_source)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    state.registry.dispatch(IndexerCommand::ProjectIndexRemoval { project_id, knowledge_source }).await?;
    Ok(Json(serde_json::json!({ "status": "removed" })))
}

#[derive(Debug, Deserialize)]
pub struct TriggerIndexRequest {
    pub knowledge_sources: Option<Vec<String>>,
    #[serde(default)]
    pub watch_for_changes: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerIndexResponse {
    pub status: &'static str,
}

pub async fn trigger_index(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<TriggerIndexRequest>,
) -> AppResult<Json<TriggerIndexResponse>> {
    state
        .registry
        .dispatch(IndexerCommand::ProjectIndexingRequested {
            project_id,
            knowledge_sources: req.knowledge_sources,
            embedding_model: None,
            embedding_store: None,
            watch_for_changes: req.watch_for_changes,
        })
        .await?;
    Ok(Json(TriggerIndexResponse { status: "started" }))
}

pub async fn knowledge_source_progress(
    State(state): State<AppState>,
    Path((project_id, source_id)): Path<(String, String)>,
) -> AppResult<Json<IndexProgress>> {
    Ok(Json(state.registry.progress(&project_id, &source_id).await?))
}

#[derive(Debug, Serialize)]
pub struct VerifyChecksumsResponse {
    pub drifted: Vec<String>,
}

pub async fn verify_checksums(
    State(state): State<AppState>,
    Path((project_id, source_id)): Path<(String, String)>,
) -> AppResult<Json<VerifyChecksumsResponse>> {
    let drifted = state.registry.verify_checksums(&project_id, &source_id).await?;
    Ok(Json(VerifyChecksumsResponse { drifted }))
}
