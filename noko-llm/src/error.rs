// ABOUTME: Error type shared by every LLM backend and the handle that fronts them.
// ABOUTME: Variants separate retryable transport failures from prompt/template mistakes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("unknown prompt template: {0}")]
    UnknownPrompt(String),

    #[error("prompt template is missing a value for {{{0}}}")]
    MissingPlaceholder(String),

    #[error("backend worker closed")]
    Closed,

    #[error("all LLM backends failed ({attempted} attempted)")]
    Unavailable { attempted: usize },
}

impl LlmError {
    /// Whether the orchestrator should move on to the next backend.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(
            self,
            LlmError::UnknownPrompt(_) | LlmError::MissingPlaceholder(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// Map a non-success HTTP status onto the matching error variant.
pub fn status_error(backend: &str, status: reqwest::StatusCode, body: &str) -> LlmError {
    let detail = format!("{backend} status={status} body={body}");
    match status.as_u16() {
        401 | 403 => LlmError::Auth(detail),
        429 => LlmError::RateLimited(detail),
        _ => LlmError::Transport(detail),
    }
}
