use crate::traits::ReplyClient;
use crate::types::ReplyToken;
use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

const LINE_API_BASE: &str = "https://api.line.me";

/// Body of `POST /v2/bot/message/reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub reply_token: ReplyToken,
    pub messages: Vec<TextMessage>,
}

impl ReplyRequest {
    pub fn text(reply_token: ReplyToken, text: impl Into<String>) -> Self {
        Self {
            reply_token,
            messages: vec![TextMessage::new(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    pub text: String,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

/// Acknowledgement of an accepted reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyAck {
    /// `x-line-request-id` of the accepted call, when LINE sent one.
    pub request_id: Option<String>,
}

#[derive(Clone)]
pub struct LineMessagingClient {
    http: reqwest::Client,
    channel_access_token: String,
    api_base: Url,
}

impl LineMessagingClient {
    pub fn new(channel_access_token: &str) -> Result<Self> {
        let channel_access_token = channel_access_token.trim();
        if channel_access_token.is_empty() {
            return Err(anyhow!("line channel access token is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            channel_access_token: channel_access_token.to_string(),
            api_base: Url::parse(LINE_API_BASE)?,
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Result<Self> {
        self.api_base = Url::parse(api_base.trim())
            .with_context(|| format!("invalid line api base url: {api_base}"))?;
        Ok(self)
    }

    fn reply_url(&self) -> Result<Url> {
        self.api_base
            .join("/v2/bot/message/reply")
            .map_err(|e| anyhow!("invalid line reply URL: {e}"))
    }
}

#[async_trait::async_trait]
impl ReplyClient for LineMessagingClient {
    #[tracing::instrument(level = "info", skip_all, fields(reply_token = %request.reply_token))]
    async fn reply(&self, request: &ReplyRequest) -> Result<ReplyAck> {
        if request.reply_token.trim().is_empty() {
            return Err(anyhow!("reply token is empty"));
        }
        if request.messages.is_empty() {
            return Err(anyhow!("reply has no messages"));
        }

        let url = self.reply_url()?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.channel_access_token)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-line-request-id")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "line reply failed: status={} request_id={} body={}",
                status,
                request_id.as_deref().unwrap_or("none"),
                body
            ));
        }

        Ok(ReplyAck { request_id })
    }
}
