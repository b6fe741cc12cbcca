//! HTTP `BackendClient`/`EmbeddingBackend` implementations. The router and embedder crates only define the traits; the
//! concrete language-model servers are an explicit Non-goal of those
//! crates and live here, at the binary edge, the way
//! `vtcode-core::llm::providers::{openai,ollama,anthropic}` live beside
//! (not inside) the provider-agnostic `llm::provider` trait module.

use std::time::Duration;

use async_trait::async_trait;
use forgeflow_llm::{BackendClient, EmbeddingBackend, GenerateOptions, RoutingError};
use serde::Deserialize;
use serde_json::json;

/// Wire protocol spoken by a backend's HTTP endpoint. Ollama, OpenAI,
/// Azure OpenAI and LM Studio all speak (a compatible subset of) the
/// OpenAI chat-completions format; Anthropic's Messages API differs
/// enough to need its own request/response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStyle {
    OpenAiChat,
    AnthropicMessages,
}

/// A backend reachable over HTTP: one instance is registered per
/// `Backend` enum variant with `BackendRouter::register_backend`.
pub struct HttpBackendClient {
    backend_name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    style: WireStyle,
}

impl HttpBackendClient {
    pub fn new(backend_name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>, style: WireStyle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { backend_name: backend_name.into(), client, base_url: base_url.into(), api_key, style }
    }

    fn unavailable(&self, message: impl Into<String>) -> RoutingError {
        RoutingError::BackendUnavailable { backend: self.backend_name.clone(), message: message.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn generate(&self, model_name: &str, prompt: &str, options: &GenerateOptions) -> Result<String, RoutingError> {
        match self.style {
            WireStyle::OpenAiChat => {
                let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
                let mut request = self.client.post(&url).json(&json!({
                    "model": model_name,
                    "messages": [{ "role": "user", "content": prompt }],
                    "temperature": options.temperature,
                    "max_tokens": options.max_tokens,
                    "top_p": options.top_p,
                }));
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
                let response = request.send().await.map_err(|e| self.unavailable(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(self.unavailable(format!("HTTP {}", response.status())));
                }
                let parsed: ChatCompletionResponse = response.json().await.map_err(|e| self.unavailable(e.to_string()))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| self.unavailable("response carried no choices"))
            }
            WireStyle::AnthropicMessages => {
                let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
                let mut request = self.client.post(&url).header("anthropic-version", "2023-06-01").json(&json!({
                    "model": model_name,
                    "max_tokens": options.max_tokens,
                    "temperature": options.temperature,
                    "messages": [{ "role": "user", "content": prompt }],
                }));
                if let Some(key) = &self.api_key {
                    request = request.header("x-api-key", key);
                }
                let response = request.send().await.map_err(|e| self.unavailable(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(self.unavailable(format!("HTTP {}", response.status())));
                }
                let parsed: AnthropicMessageResponse = response.json().await.map_err(|e| self.unavailable(e.to_string()))?;
                parsed
                    .content
                    .into_iter()
                    .next()
                    .map(|block| block.text)
                    .ok_or_else(|| self.unavailable("response carried no content blocks"))
            }
        }
    }
}

/// OpenAI-compatible `/embeddings` endpoint. Ollama, OpenAI, LM Studio and
/// Azure OpenAI all expose one; Anthropic does not ship embeddings, so an
/// Anthropic-routed `EmbeddingModelId` is a configuration error the
/// resolver should catch before this type is ever constructed.
pub struct HttpEmbeddingBackend {
    backend_name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEmbeddingBackend {
    pub fn new(backend_name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { backend_name: backend_name.into(), client: reqwest::Client::new(), base_url: base_url.into(), api_key }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, RoutingError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&json!({ "input": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RoutingError::BackendUnavailable { backend: self.backend_name.clone(), message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(RoutingError::BackendUnavailable { backend: self.backend_name.clone(), message: format!("HTTP {}", response.status()) });
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RoutingError::BackendUnavailable { backend: self.backend_name.clone(), message: e.to_string() })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| RoutingError::BackendUnavailable { backend: self.backend_name.clone(), message: "response carried no embedding".to_string() })
    }
}
