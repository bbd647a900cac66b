//! EmbeddingCapability: `text -> fixed-length float vector`, exposing
//! dimension and a provider-specific token budget. Implementations exist
//! for a local on-device model (Qwen3-Embedding-0.6B via fastembed's candle
//! backend) and for the documented HTTP provider families. `anthropic` and
//! `xai` are deliberately unsupported for embedding.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candle_core::{DType, Device};
use fastembed::Qwen3TextEmbedding;
use serde_json::json;
use tracing::{info, warn};

use crate::config;
use crate::error::{is_transient_error_message, AppError, AppResult};

/// HuggingFace model repository for the local embedder.
const QWEN3_REPO_ID: &str = "Qwen/Qwen3-Embedding-0.6B";
const QWEN3_DEFAULT_DIM: usize = 1024;
const QWEN3_MAX_LENGTH: usize = 8192;

#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
    fn dimension(&self) -> usize;
    fn token_limit(&self) -> usize;
    fn provider_name(&self) -> &str;
}

/// Local, on-device embedder. Lazily loads the model on first use behind a
/// double-checked lock so concurrent callers don't race the HF download.
pub struct LocalQwen3Embedder {
    model: Arc<Mutex<Option<Qwen3TextEmbedding>>>,
    model_initialized: Arc<std::sync::atomic::AtomicBool>,
    dimension: usize,
}

impl LocalQwen3Embedder {
    pub fn new(preferred_dim: Option<usize>) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            model_initialized: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            dimension: preferred_dim.unwrap_or(QWEN3_DEFAULT_DIM),
        }
    }

    fn ensure_model(&self) -> AppResult<()> {
        if self.model_initialized.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|e| AppError::IndexError(format!("model lock poisoned: {}", e)))?;

        if guard.is_some() {
            self.model_initialized.store(true, std::sync::atomic::Ordering::Release);
            return Ok(());
        }

        info!("initializing {} ({}d, max_len={})...", QWEN3_REPO_ID, self.dimension, QWEN3_MAX_LENGTH);

        let device = Device::Cpu;
        let model = Qwen3TextEmbedding::from_hf(QWEN3_REPO_ID, &device, DType::F32, QWEN3_MAX_LENGTH).map_err(|e| {
            AppError::ModelNotAvailable {
                provider: "local".to_string(),
                model: QWEN3_REPO_ID.to_string(),
                reason: e.to_string(),
            }
        })?;

        // Dimension-resolution rule: prefer a configured
        // `preferred_dim`, probe otherwise; a conflict between the two is
        // fatal rather than silently overridden.
        let actual_dim = model.config().hidden_size;
        if actual_dim != self.dimension {
            return Err(AppError::ModelNotAvailable {
                provider: "local".to_string(),
                model: QWEN3_REPO_ID.to_string(),
                reason: format!("configured dimension {} conflicts with model dimension {}", self.dimension, actual_dim),
            });
        }

        *guard = Some(model);
        self.model_initialized.store(true, std::sync::atomic::Ordering::Release);
        info!("{} initialized ({}d, candle CPU)", QWEN3_REPO_ID, self.dimension);
        Ok(())
    }
}

#[async_trait]
impl EmbeddingCapability for LocalQwen3Embedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let out = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        out.into_iter()
            .next()
            .ok_or_else(|| AppError::IndexError("embedding model returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.ensure_model()?;
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = model
                .lock()
                .map_err(|e| AppError::IndexError(format!("model lock poisoned: {}", e)))?;
            let model = guard
                .as_ref()
                .ok_or_else(|| AppError::IndexError("embedding model not initialized".into()))?;
            model.embed(&texts).map_err(|e| AppError::TransientEmbeddingError(e.to_string()))
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn token_limit(&self) -> usize {
        QWEN3_MAX_LENGTH
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Supported HTTP embedding providers. `anthropic` and `xai` are not in
/// this list — they never implement `EmbeddingCapability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProvider {
    OpenAi,
    Gemini,
    Ollama,
    Docker,
    LocalAi,
    LmStudio,
}

impl HttpProvider {
    pub fn parse(name: &str) -> AppResult<Self> {
        match name.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "docker" => Ok(Self::Docker),
            "localai" => Ok(Self::LocalAi),
            "lmstudio" => Ok(Self::LmStudio),
            "anthropic" | "xai" => Err(AppError::UnsupportedProviderCapability(name.to_string())),
            other => Err(AppError::UnsupportedProviderCapability(other.to_string())),
        }
    }
}

/// HTTP-backed embedder for remote/local-server providers.
pub struct HttpEmbedder {
    client: reqwest::Client,
    provider: HttpProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(provider: HttpProvider, base_url: String, model: String, api_key: Option<String>, preferred_dim: Option<usize>) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            base_url,
            model: model.clone(),
            api_key,
            dimension: preferred_dim.unwrap_or_else(|| config::embedding_dimension_for_model(&model)),
        }
    }

    fn endpoint(&self) -> String {
        match self.provider {
            HttpProvider::OpenAi => format!("{}/embeddings", self.base_url.trim_end_matches('/')),
            HttpProvider::Gemini => format!("{}/models/{}:embedContent", self.base_url.trim_end_matches('/'), self.model),
            HttpProvider::Ollama => format!("{}/api/embeddings", self.base_url.trim_end_matches('/')),
            HttpProvider::Docker | HttpProvider::LocalAi | HttpProvider::LmStudio => {
                format!("{}/embeddings", self.base_url.trim_end_matches('/'))
            }
        }
    }

    fn build_request(&self, text: &str) -> serde_json::Value {
        match self.provider {
            HttpProvider::Gemini => json!({ "content": { "parts": [{ "text": text }] } }),
            HttpProvider::Ollama => json!({ "model": self.model, "prompt": text }),
            _ => json!({ "model": self.model, "input": text }),
        }
    }

    fn parse_response(&self, body: serde_json::Value) -> AppResult<Vec<f32>> {
        let vector = match self.provider {
            HttpProvider::Gemini => body.get("embedding").and_then(|e| e.get("values")).cloned(),
            HttpProvider::Ollama => body.get("embedding").cloned(),
            _ => body
                .get("data")
                .and_then(|d| d.as_array())
                .and_then(|a| a.first())
                .and_then(|o| o.get("embedding"))
                .cloned(),
        };

        let vector = vector.ok_or_else(|| AppError::TransientEmbeddingError("malformed embedding response".into()))?;
        serde_json::from_value::<Vec<f32>>(vector).map_err(|e| AppError::TransientEmbeddingError(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingCapability for HttpEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut request = self.client.post(self.endpoint()).json(&self.build_request(text));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::TransientEmbeddingError(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(AppError::TransientEmbeddingError(format!("{} {}", status, body_text)));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| AppError::TransientEmbeddingError(e.to_string()))?;
        self.parse_response(body)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn token_limit(&self) -> usize {
        config::token_limit_for_model(&self.model)
    }

    fn provider_name(&self) -> &str {
        match self.provider {
            HttpProvider::OpenAi => "openai",
            HttpProvider::Gemini => "gemini",
            HttpProvider::Ollama => "ollama",
            HttpProvider::Docker => "docker",
            HttpProvider::LocalAi => "localai",
            HttpProvider::LmStudio => "lmstudio",
        }
    }
}

/// `LocalModelValidator::check`: preflights a provider/model pair with a
/// short dummy string, per IndexingCoordinator's pipeline step 1.
pub enum ValidationOutcome {
    Available,
    ProviderUnreachable,
    NotAvailable { reason: String },
}

pub async fn check_model_available(embedder: &dyn EmbeddingCapability) -> ValidationOutcome {
    match embedder.embed("ping").await {
        Ok(vector) if vector.len() != embedder.dimension() => ValidationOutcome::NotAvailable {
            reason: format!(
                "configured dimension {} conflicts with probed dimension {}",
                embedder.dimension(),
                vector.len()
            ),
        },
        Ok(_) => ValidationOutcome::Available,
        Err(AppError::ModelNotAvailable { reason, .. }) => ValidationOutcome::NotAvailable { reason },
        Err(e) if is_transient_error_message(&e.to_string()) => ValidationOutcome::ProviderUnreachable,
        Err(e) => ValidationOutcome::NotAvailable { reason: e.to_string() },
    }
}

/// Embeds `text` with retry/backoff on transient errors:
/// `base * 2^(attempt-1)`, up to `attempts`. Non-transient errors fail fast.
pub async fn embed_with_retry(embedder: &dyn EmbeddingCapability, text: &str, attempts: u32, base_ms: u64) -> AppResult<Vec<f32>> {
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match embedder.embed(text).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_fatal_to_coordinator() => return Err(e),
            Err(e) => {
                let transient = is_transient_error_message(&e.to_string());
                last_err = Some(e);
                if !transient || attempt == attempts.max(1) {
                    break;
                }
                let delay_ms = base_ms * (1u64 << (attempt - 1));
                warn!("transient embedding error on attempt {}/{}, retrying in {}ms", attempt, attempts, delay_ms);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| AppError::TransientEmbeddingError("exhausted retries".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyEmbedder {
        dim: usize,
        fail_count: std::sync::atomic::AtomicU32,
        max_failures: u32,
    }

    #[async_trait]
    impl EmbeddingCapability for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
            let count = self.fail_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if count < self.max_failures {
                Err(AppError::TransientEmbeddingError("connection reset".into()))
            } else {
                Ok(vec![0.0; self.dim])
            }
        }
        fn dimension(&self) -> usize {
            self.dim
        }
        fn token_limit(&self) -> usize {
            2048
        }
        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let embedder = FlakyEmbedder {
            dim: 4,
            fail_count: std::sync::atomic::AtomicU32::new(0),
            max_failures: 2,
        };
        let result = embed_with_retry(&embedder, "hi", 3, 1).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausts_retries_and_fails() {
        let embedder = FlakyEmbedder {
            dim: 4,
            fail_count: std::sync::atomic::AtomicU32::new(0),
            max_failures: 10,
        };
        let result = embed_with_retry(&embedder, "hi", 3, 1).await;
        assert!(result.is_err());
    }

    #[test]
    fn anthropic_and_xai_are_unsupported() {
        assert!(HttpProvider::parse("anthropic").is_err());
        assert!(HttpProvider::parse("xai").is_err());
        assert!(HttpProvider::parse("openai").is_ok());
    }

    struct MismatchedEmbedder;

    #[async_trait]
    impl EmbeddingCapability for MismatchedEmbedder {
        async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
            Ok(vec![0.0; 1536])
        }
        fn dimension(&self) -> usize {
            8191
        }
        fn token_limit(&self) -> usize {
            8191
        }
        fn provider_name(&self) -> &str {
            "mismatched"
        }
    }

    #[tokio::test]
    async fn preflight_fails_when_probed_dimension_conflicts_with_configured() {
        let outcome = check_model_available(&MismatchedEmbedder).await;
        assert!(matches!(outcome, ValidationOutcome::NotAvailable { .. }));
    }
}
