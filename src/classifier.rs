//! IntentClassifier: async YES/NO gate deciding whether retrieval
//! runs at all, bounded by a hard timeout and fail-open on any error. The
//! `ChatClient` capability mirrors the `reqwest`-based shape of
//! `embedder.rs`'s `HttpEmbedder` since both are thin HTTP capability
//! wrappers around a provider endpoint.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::error::{AppError, AppResult};

const MAX_HISTORY_MESSAGES: usize = 3;
const MAX_LINE_CHARS: usize = 150;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, prompt: &str) -> AppResult<String>;
}

/// HTTP-backed `ChatClient`, same reqwest shape as `embedder.rs`'s
/// `HttpEmbedder` but targeting an OpenAI-compatible `/chat/completions`
/// endpoint. Any provider the user points it at (openai, ollama, a local
/// server) only needs to speak that wire format.
pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpChatClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url, model, api_key }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn send(&self, prompt: &str) -> AppResult<String> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.0,
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::ClassifierError(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(AppError::ClassifierError(format!("{} {}", status, body_text)));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| AppError::ClassifierError(e.to_string()))?;
        body.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::ClassifierError("malformed chat completion response".into()))
    }
}

#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

pub struct IntentClassifier<'a> {
    client: &'a dyn ChatClient,
    timeout_ms: u64,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(client: &'a dyn ChatClient, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }

    /// Fails open (returns `true`) on timeout or any client error, so a
    /// broken classifier never silently disables retrieval.
    pub async fn should_use_rag(&self, user_message: &str, recent_history: &[HistoryMessage]) -> bool {
        let prompt = build_prompt(user_message, recent_history);
        let call = self.client.send(&prompt);

        match tokio::time::timeout(std::time::Duration::from_millis(self.timeout_ms), call).await {
            Ok(Ok(response)) => response.trim().to_uppercase() == "YES",
            Ok(Err(e)) => {
                warn!(error = %e, "classifier call failed, failing open to retrieval");
                true
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout_ms, "classifier timed out, failing open to retrieval");
                true
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

fn build_prompt(user_message: &str, recent_history: &[HistoryMessage]) -> String {
    let mut lines = Vec::new();
    let start = recent_history.len().saturating_sub(MAX_HISTORY_MESSAGES);
    for msg in &recent_history[start..] {
        lines.push(format!("{}: {}", msg.role, truncate(&msg.content, MAX_LINE_CHARS)));
    }
    lines.push(format!("User: {}", user_message));
    lines.push(
        "Based on the conversation above, should the assistant search the indexed project files \
         to answer the user's message? Respond with exactly one word: YES or NO."
            .to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedClient {
        response: String,
        delay_ms: u64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatClient for FixedClient {
        async fn send(&self, _prompt: &str) -> AppResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            Ok(self.response.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl ChatClient for FailingClient {
        async fn send(&self, _prompt: &str) -> AppResult<String> {
            Err(crate::error::AppError::ClassifierError("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn yes_response_enables_rag() {
        let client = FixedClient { response: "YES".to_string(), delay_ms: 0, calls: Arc::new(AtomicUsize::new(0)) };
        let classifier = IntentClassifier::new(&client, 1000);
        assert!(classifier.should_use_rag("find the parser", &[]).await);
    }

    #[tokio::test]
    async fn no_response_disables_rag() {
        let client = FixedClient { response: " no ".to_string(), delay_ms: 0, calls: Arc::new(AtomicUsize::new(0)) };
        let classifier = IntentClassifier::new(&client, 1000);
        assert!(!classifier.should_use_rag("hello", &[]).await);
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        let client = FixedClient { response: "NO".to_string(), delay_ms: 200, calls: Arc::new(AtomicUsize::new(0)) };
        let classifier = IntentClassifier::new(&client, 20);
        assert!(classifier.should_use_rag("hello", &[]).await);
    }

    #[tokio::test]
    async fn client_error_fails_open() {
        let client = FailingClient;
        let classifier = IntentClassifier::new(&client, 1000);
        assert!(classifier.should_use_rag("hello", &[]).await);
    }

    #[test]
    fn prompt_keeps_only_last_three_history_messages_and_truncates() {
        let history = vec![
            HistoryMessage { role: "User".to_string(), content: "a".repeat(200) },
            HistoryMessage { role: "Assistant".to_string(), content: "ok".to_string() },
            HistoryMessage { role: "User".to_string(), content: "second".to_string() },
            HistoryMessage { role: "Assistant".to_string(), content: "third".to_string() },
        ];
        let prompt = build_prompt("current question", &history);
        assert!(!prompt.contains(&"a".repeat(200)));
        assert!(prompt.contains("..."));
        assert!(prompt.contains("current question"));
        assert!(prompt.contains("YES"));
    }
}
