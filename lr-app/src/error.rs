use lr_llm::LlmError;
use std::time::Duration;
use thiserror::Error;

/// Why the backend produced no usable reply. Never leaves the generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation exceeded {0:?} deadline")]
    Timeout(Duration),

    #[error("generation backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("generation backend panicked: {0}")]
    Panicked(String),
}

/// A reply that did not reach LINE.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("reply delivery exceeded {0:?} deadline")]
    Timeout(Duration),

    #[error("reply delivery failed: {0}")]
    Transport(String),
}
