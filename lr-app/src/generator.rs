//! Reply generation with a hard deadline and fixed fallbacks.

use crate::error::GenerationError;
use futures_util::FutureExt;
use lr_llm::{ChatBackend, ChatMessage};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

pub struct ResponseGenerator {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
    deadline: Duration,
    timeout_fallback: String,
    error_fallback: String,
}

impl ResponseGenerator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        system_prompt: impl Into<String>,
        deadline: Duration,
        timeout_fallback: impl Into<String>,
        error_fallback: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
            deadline,
            timeout_fallback: timeout_fallback.into(),
            error_fallback: error_fallback.into(),
        }
    }

    /// Produce a displayable reply. Backend failures, backend panics and
    /// deadline expiry turn into the configured fallback sentences; the
    /// model's text, even when empty, is returned untouched.
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.backend.model()))]
    pub async fn generate(&self, user_message: &str, history: &[ChatMessage]) -> String {
        match self.try_generate(user_message, history).await {
            Ok(text) => text,
            Err(error) => {
                let transient = match &error {
                    GenerationError::Timeout(_) => true,
                    GenerationError::Backend(e) => e.is_transient(),
                    GenerationError::Panicked(_) => false,
                };
                tracing::warn!(%error, transient, "generation failed; using fallback reply");
                self.fallback_for(&error).to_string()
            }
        }
    }

    async fn try_generate(
        &self,
        user_message: &str,
        history: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        let messages = build_messages(&self.system_prompt, history, user_message);
        // Dropping the losing future abandons the HTTP call; the provider may still finish it.
        let call = AssertUnwindSafe(self.backend.chat(&messages)).catch_unwind();
        let response = match tokio::time::timeout(self.deadline, call).await {
            Err(_) => return Err(GenerationError::Timeout(self.deadline)),
            Ok(Err(payload)) => {
                return Err(GenerationError::Panicked(crate::panic_payload_to_string(
                    payload.as_ref(),
                )));
            }
            Ok(Ok(result)) => result?,
        };
        tracing::debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = %response.finish_reason,
            reply_chars = response.text.chars().count(),
            "generation completed"
        );
        Ok(response.text)
    }

    fn fallback_for(&self, error: &GenerationError) -> &str {
        match error {
            GenerationError::Timeout(_) => &self.timeout_fallback,
            GenerationError::Backend(_) | GenerationError::Panicked(_) => &self.error_fallback,
        }
    }
}

/// `[system] + history + [user]`.
pub fn build_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_message));
    messages
}
