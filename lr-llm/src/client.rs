use crate::anthropic::AnthropicClient;
use crate::error::{LlmError, Result};
use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Anything that can turn a message list into one assistant reply.
///
/// `LlmClient` is the production implementation; the relay only depends on
/// this trait so it can run against in-memory backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: Option<String>,
    max_tokens: u32,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            provider: detect_provider(model),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            max_tokens: 2048,
            client,
        })
    }

    /// Point the client at an alternative API root (OpenAI-compatible gateways, proxies).
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = ?self.provider, model = %self.model))]
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let base_url = self.base_url.as_deref();
        match self.provider {
            Provider::OpenAI => {
                OpenAiClient::new(self.client.clone(), &self.api_key, &self.model, base_url)
                    .chat(messages)
                    .await
            }
            Provider::Anthropic => {
                AnthropicClient::new(self.client.clone(), &self.api_key, &self.model, base_url)
                    .with_max_tokens(self.max_tokens)
                    .chat(messages)
                    .await
            }
            Provider::Gemini => {
                GeminiClient::new(self.client.clone(), &self.api_key, &self.model, base_url)
                    .with_max_tokens(self.max_tokens)
                    .chat(messages)
                    .await
            }
        }
    }
}

pub fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    if m.starts_with("gemini-") || m.starts_with("models/gemini-") {
        return Provider::Gemini;
    }
    Provider::OpenAI
}
