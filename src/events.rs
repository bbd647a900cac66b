//! Process-wide event bus types. Commands flow into the registry; lifecycle
//! events flow out to the chat layer and any connected WebSocket clients
//! over a broadcast channel.

use serde::Serialize;

/// Commands accepted by `ProjectIndexer`.
#[derive(Debug, Clone)]
pub enum IndexerCommand {
    ProjectIndexingRequested {
        project_id: String,
        knowledge_sources: Option<Vec<String>>,
        embedding_model: Option<String>,
        embedding_store: Option<String>,
        watch_for_changes: bool,
    },
    ProjectReIndex {
        project_id: String,
        reason: String,
    },
    ProjectDeleted {
        project_id: String,
    },
    ProjectIndexRemoval {
        project_id: String,
        knowledge_source: String,
    },
}

/// Lifecycle events published outward, broadcast to all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum IndexerEvent {
    #[serde(rename = "indexing_started")]
    IndexingStarted {
        project_id: String,
        project_name: String,
        estimated_files: Option<usize>,
    },
    #[serde(rename = "indexing_in_progress")]
    IndexingInProgress {
        project_id: String,
        knowledge_source: String,
        files_indexed: usize,
        total_files: usize,
    },
    #[serde(rename = "indexing_completed")]
    IndexingCompleted { project_id: String, files_indexed: usize },
    #[serde(rename = "indexing_failed")]
    IndexingFailed { project_id: String, error_message: String },
    #[serde(rename = "model_not_available")]
    ModelNotAvailable {
        provider: String,
        model: String,
        is_embedding: bool,
        reason: String,
    },
    #[serde(rename = "indexing_error")]
    IndexingError {
        project_id: String,
        error_type: String,
        details: String,
    },
    #[serde(rename = "file_changed")]
    FileChanged {
        project_id: String,
        knowledge_source: String,
        path: String,
        change_type: String,
    },
}

impl IndexerEvent {
    /// The project an event belongs to, used by the WebSocket handler to
    /// filter the broadcast stream down to a client's subscribed projects.
    pub fn project_id(&self) -> &str {
        match self {
            IndexerEvent::IndexingStarted { project_id, .. }
            | IndexerEvent::IndexingInProgress { project_id, .. }
            | IndexerEvent::IndexingCompleted { project_id, .. }
            | IndexerEvent::IndexingFailed { project_id, .. }
            | IndexerEvent::IndexingError { project_id, .. }
            | IndexerEvent::FileChanged { project_id, .. } => project_id,
            IndexerEvent::ModelNotAvailable { .. } => "",
        }
    }
}
