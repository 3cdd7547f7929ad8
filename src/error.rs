use std::time::Duration;

use crate::quiz::normalize::NormalizeError;

/// Everything that can go wrong between asking for a quiz and holding a
/// normalized [`crate::QuizItem`].
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream failure ({status}): {detail}")]
    Upstream { status: u16, detail: String },
    #[error("no text in upstream response")]
    UpstreamEmptyResponse { raw: serde_json::Value },
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] NormalizeError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerateError {
    /// Caller mistakes are final; every upstream problem is worth another try.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerateError::InvalidRequest(_))
    }
}
