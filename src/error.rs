use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project already exists: {0}")]
    ProjectAlreadyExists(String),

    #[error("Knowledge source not found: {0}")]
    KnowledgeSourceNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Search error: {0}")]
    SearchError(String),

    /// Embedding model or classifier LLM unreachable/unknown. Fatal to the
    /// coordinator: preflighted, surfaced via `ModelNotAvailableEvent`.
    #[error("Model not available: provider={provider} model={model} reason={reason}")]
    ModelNotAvailable {
        provider: String,
        model: String,
        reason: String,
    },

    /// Embedding call failed with a transient signal (timeout, connection
    /// reset, 502/503/504). Retried with capped exponential backoff by the
    /// caller; this variant is the terminal failure after attempts exhaust.
    #[error("Transient embedding error after retries: {0}")]
    TransientEmbeddingError(String),

    /// A provider was asked to embed but does not support it (anthropic,
    /// xai). Fatal: the coordinator refuses to start.
    #[error("Provider {0} does not support embedding")]
    UnsupportedProviderCapability(String),

    /// Either store failed at commit; the containing batch is rolled back.
    #[error("Store write failed: {0}")]
    StoreWriteError(String),

    /// The vector store has no delete-by-filter capability. Downgraded to a
    /// warning by callers; removal proceeds against the keyword store.
    #[error("Vector store does not support filtered removal: {0}")]
    StoreRemoveUnsupported(String),

    #[error("Classifier timed out after {0}ms")]
    ClassifierTimeout(u64),

    #[error("Classifier error: {0}")]
    ClassifierError(String),

    /// The file watcher's event queue overflowed; triggers one full rescan.
    #[error("File watcher overflow for {0}")]
    WatcherOverflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("State store error: {0}")]
    StateStore(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Propagation policy: true for errors recovered locally by
    /// the coordinator (logged, counter advances, pass continues) as
    /// opposed to errors that must surface and fail the whole pass.
    pub fn is_recoverable_per_file(&self) -> bool {
        matches!(
            self,
            AppError::Io(_) | AppError::TransientEmbeddingError(_) | AppError::StoreRemoveUnsupported(_)
        )
    }

    pub fn is_fatal_to_coordinator(&self) -> bool {
        matches!(
            self,
            AppError::ModelNotAvailable { .. } | AppError::UnsupportedProviderCapability(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ProjectNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ProjectAlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::KnowledgeSourceNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::FileNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::PathNotAllowed(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::IndexError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::SearchError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::ModelNotAvailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::TransientEmbeddingError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::UnsupportedProviderCapability(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::StoreWriteError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::StoreRemoveUnsupported(_) => (StatusCode::OK, self.to_string()),
            AppError::ClassifierTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::ClassifierError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::WatcherOverflow(_) => (StatusCode::OK, self.to_string()),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::StateStore(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Transient-failure signatures for the embedding retry's cancellation/timeout handling:
/// EOF, timeout, connection reset/refused, 502/503/504, "bad gateway",
/// "service unavailable".
pub fn is_transient_error_message(message: &str) -> bool {
    let m = message.to_lowercase();
    const PATTERNS: &[&str] = &[
        "eof",
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "502",
        "503",
        "504",
        "bad gateway",
        "service unavailable",
    ];
    PATTERNS.iter().any(|p| m.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_transient_patterns() {
        assert!(is_transient_error_message("connection reset by peer"));
        assert!(is_transient_error_message("Bad Gateway (502)"));
        assert!(is_transient_error_message("request timed out"));
        assert!(!is_transient_error_message("invalid api key"));
    }

    #[test]
    fn classifies_recoverable_vs_fatal() {
        let recoverable = AppError::TransientEmbeddingError("x".into());
        assert!(recoverable.is_recoverable_per_file());
        assert!(!recoverable.is_fatal_to_coordinator());

        let fatal = AppError::ModelNotAvailable {
            provider: "ollama".into(),
            model: "nomic".into(),
            reason: "unreachable".into(),
        };
        assert!(fatal.is_fatal_to_coordinator());
        assert!(!fatal.is_recoverable_per_file());
    }
}
