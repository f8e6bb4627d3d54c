//! BYO-key LLM client for LineRelay.
//!
//! Pure HTTP client: one non-streaming chat call per provider, normalized to
//! a single `ChatResponse`.

mod anthropic;
mod client;
mod error;
mod gemini;
mod openai;
mod types;

pub use client::{ChatBackend, LlmClient, Provider, detect_provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
