//! LineRelay configuration loader.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! process environment (which `main` seeds from `.env`).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an AI diet coach.

- Expertise: nutrition, exercise physiology and behavioural psychology. Give evidence-based advice.
- Style: friendly and encouraging, but honest and firm when it helps the user.
- Goal: support healthy, sustainable weight management.

When replying:
1. Base information on scientific evidence.
2. Empathise with the user's situation and feelings while giving constructive advice.
3. Never recommend dangerous dieting methods; suggest healthy alternatives.
4. When medical advice is needed, recommend consulting a professional.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayTuning,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineConfig {
    #[serde(default)]
    pub channel_secret: String,
    #[serde(default)]
    pub channel_access_token: String,
    /// Override for the Messaging API root (staging, local mocks).
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout for every route except `/webhook`, which is bounded by
    /// the relay deadlines instead.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_http_timeout_seconds() -> u64 {
    60
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayTuning {
    #[serde(default = "default_generation_timeout_seconds")]
    pub generation_timeout_seconds: u64,
    #[serde(default = "default_delivery_timeout_seconds")]
    pub delivery_timeout_seconds: u64,
    /// LINE rejects text over 5000 characters; stay below it.
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    #[serde(default = "default_continuation_marker")]
    pub continuation_marker: String,
    #[serde(default = "default_timeout_fallback")]
    pub timeout_fallback: String,
    #[serde(default = "default_error_fallback")]
    pub error_fallback: String,
    #[serde(default = "default_delivery_fallback")]
    pub delivery_fallback: String,
}

fn default_generation_timeout_seconds() -> u64 {
    15
}

fn default_delivery_timeout_seconds() -> u64 {
    10
}

fn default_max_reply_chars() -> usize {
    4000
}

fn default_continuation_marker() -> String {
    "\n...(continued)".to_string()
}

fn default_timeout_fallback() -> String {
    "Sorry, this is taking longer than expected. Please try a shorter question.".to_string()
}

fn default_error_fallback() -> String {
    "Sorry, I can't respond right now. Please try again in a little while.".to_string()
}

fn default_delivery_fallback() -> String {
    "Sorry, something went wrong while sending my reply. Please try again.".to_string()
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            generation_timeout_seconds: default_generation_timeout_seconds(),
            delivery_timeout_seconds: default_delivery_timeout_seconds(),
            max_reply_chars: default_max_reply_chars(),
            continuation_marker: default_continuation_marker(),
            timeout_fallback: default_timeout_fallback(),
            error_fallback: default_error_fallback(),
            delivery_fallback: default_delivery_fallback(),
        }
    }
}

impl RelayTuning {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_seconds)
    }
}

impl RelayConfig {
    /// Load, apply environment overrides and validate.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg = Self::read(path).await?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and apply environment overrides without validating.
    pub async fn read(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(&path).await?,
            None => Self::default(),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        Self::from_toml(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("LINE_CHANNEL_SECRET") {
            self.line.channel_secret = v;
        }
        if let Some(v) = var("LINE_CHANNEL_ACCESS_TOKEN") {
            self.line.channel_access_token = v;
        }
        if let Some(v) = var("LINE_API_BASE_URL") {
            self.line.api_base_url = Some(v);
        }
        if let Some(v) = var("LINERELAY_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("LINERELAY_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = var("LINERELAY_SYSTEM_PROMPT") {
            self.llm.system_prompt = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v);
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(v);
        }
        if let Some(v) = var("GOOGLE_GENERATIVE_AI_API_KEY").or_else(|| var("GEMINI_API_KEY")) {
            self.llm.gemini_api_key = Some(v);
        }
        if let Some(v) = var("LINERELAY_BIND_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring unparseable PORT"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.line.channel_secret.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "line.channel_secret is required (LINE_CHANNEL_SECRET)"
            ));
        }
        if self.line.channel_access_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "line.channel_access_token is required (LINE_CHANNEL_ACCESS_TOKEN)"
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        if self.api_key_for_model().is_none() {
            return Err(anyhow::anyhow!(
                "no api key configured for model {:?}",
                self.llm.model
            ));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.relay.generation_timeout_seconds == 0 || self.relay.delivery_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("relay timeouts must be > 0"));
        }
        if self.relay.max_reply_chars == 0 {
            return Err(anyhow::anyhow!("relay.max_reply_chars must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        Ok(())
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let model = self.llm.model.to_ascii_lowercase();
        let key = if model.starts_with("claude-") {
            self.llm.anthropic_api_key.clone()
        } else if model.starts_with("gemini-") || model.starts_with("models/gemini-") {
            self.llm.gemini_api_key.clone()
        } else {
            self.llm.openai_api_key.clone()
        };
        key.filter(|s| !s.trim().is_empty())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let raw = format!("{}:{}", self.server.host.trim(), self.server.port);
        raw.parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {raw:?}: {e}"))
    }
}
