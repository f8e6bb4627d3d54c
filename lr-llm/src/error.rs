use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure before any status was received.
    #[error("http error: {0}")]
    Http(String),

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl LlmError {
    /// Rate limits and provider-side failures; a later identical call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidInput(_) | Self::ResponseFormat(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_name_provider_and_code() {
        let err = LlmError::Status {
            provider: "gemini",
            status: 403,
            body: "API key not valid".to_string(),
        };
        assert_eq!(err.to_string(), "gemini returned status 403: API key not valid");
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [429, 500, 503] {
            let err = LlmError::Status {
                provider: "openai",
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "status {status}");
        }
        assert!(LlmError::Http("connection reset".to_string()).is_transient());
        assert!(!LlmError::ResponseFormat("no candidates".to_string()).is_transient());
    }
}
