use thiserror::Error;

/// Errors surfaced by calls against the conversation service.
///
/// User cancellation and race supersession are deliberately absent from this
/// taxonomy: both are successful outcomes (`StreamOutcome::Cancelled`, and a
/// guarded load returning `Ok(None)`). Background sync failures are logged
/// and retried, never surfaced through this type.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response within the configured budget. Retryable.
    #[error("request timed out")]
    Timeout,

    /// The request never produced a response from the server. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Structured error payload from the server; the server decides whether
    /// a retry makes sense.
    #[error("server error: {message}")]
    Server {
        code: Option<String>,
        message: String,
        retryable: bool,
    },

    /// The server responded with a payload we could not decode.
    #[error("malformed server payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether the orchestrator should offer a retry action for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Network(_) => true,
            ApiError::Server { retryable, .. } => *retryable,
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
