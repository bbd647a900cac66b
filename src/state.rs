//! Shared application state: the embedding capability is built exactly
//! once here and handed to the registry as a factory that clones the same
//! `Arc` for every knowledge source, so the on-device model loads a single
//! time regardless of how many projects are open.

use std::path::PathBuf;
use std::sync::Arc;

use crate::classifier::{ChatClient, HttpChatClient};
use crate::config::AppConfig;
use crate::embedder::{EmbeddingCapability, HttpEmbedder, HttpProvider, LocalQwen3Embedder};
use crate::error::{AppError, AppResult};
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<Registry>,
    pub classifier_client: Arc<dyn ChatClient>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir).await.map_err(AppError::Io)?;

        let embedder = build_embedder()?;
        let factory = {
            let embedder = Arc::clone(&embedder);
            Arc::new(move || Arc::clone(&embedder))
        };

        let registry = Registry::new(data_dir, config.clone(), factory)?;
        let classifier_client = build_chat_client();

        Ok(Self { config, registry, classifier_client })
    }
}

/// Resolves the embedding capability from `RAGFORGE_EMBEDDING_PROVIDER`.
/// `local` (the default) loads the on-device Qwen3 model; any other
/// recognized provider name talks to its HTTP endpoint instead.
fn build_embedder() -> AppResult<Arc<dyn EmbeddingCapability>> {
    let provider = std::env::var("RAGFORGE_EMBEDDING_PROVIDER").unwrap_or_else(|_| "local".to_string());
    let preferred_dim = std::env::var("RAGFORGE_EMBEDDING_DIM").ok().and_then(|v| v.parse().ok());

    if provider.eq_ignore_ascii_case("local") {
        return Ok(Arc::new(LocalQwen3Embedder::new(preferred_dim)));
    }

    let http_provider = HttpProvider::parse(&provider)?;
    let base_url = std::env::var("RAGFORGE_EMBEDDING_BASE_URL")
        .map_err(|_| AppError::BadRequest("RAGFORGE_EMBEDDING_BASE_URL must be set for a non-local embedding provider".to_string()))?;
    let model = std::env::var("RAGFORGE_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
    let api_key = std::env::var("RAGFORGE_EMBEDDING_API_KEY").ok();

    Ok(Arc::new(HttpEmbedder::new(http_provider, base_url, model, api_key, preferred_dim)))
}

/// Builds the classifier's chat client from `RAGFORGE_CHAT_*` env vars,
/// defaulting to a local Ollama-style endpoint so the classifier works out
/// of the box alongside a local embedder.
fn build_chat_client() -> Arc<dyn ChatClient> {
    let base_url = std::env::var("RAGFORGE_CHAT_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
    let model = std::env::var("RAGFORGE_CHAT_MODEL").unwrap_or_else(|_| "llama3.1".to_string());
    let api_key = std::env::var("RAGFORGE_CHAT_API_KEY").ok();
    Arc::new(HttpChatClient::new(base_url, model, api_key))
}
