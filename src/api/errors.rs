//! Drive API error types
//!
//! Structured error handling for remote Drive operations.
//! Maps HTTP status codes to variants that drive retry decisions in the batcher.

/// Drive API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited — try again after backoff")]
    RateLimited,

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response ({0}): {1}")]
    Unexpected(u16, String),
}

impl ApiError {
    /// HTTP status code carried by this error, if any.
    /// Transport-level failures have none.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest(_) => Some(400),
            ApiError::Unauthorized(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::Server(status, _) => Some(*status),
            ApiError::Network(_) => None,
            ApiError::Unexpected(status, _) => Some(*status),
        }
    }

    /// Whether the batcher should back off and re-queue the request.
    ///
    /// Forbidden counts as retryable: the Drive API reports per-user rate
    /// limits as 403.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Forbidden(_) | ApiError::RateLimited | ApiError::Network(_) => true,
            ApiError::Server(status, _) => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether the request is known to be unrecoverable (resolved as absent,
    /// never re-queued).
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            ApiError::BadRequest(_) | ApiError::Unauthorized(_) | ApiError::NotFound(_)
        )
    }

    /// Create an ApiError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            400 => ApiError::BadRequest(body.to_string()),
            401 => ApiError::Unauthorized(body.to_string()),
            403 => ApiError::Forbidden(body.to_string()),
            404 => ApiError::NotFound(body.to_string()),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server(status, body.to_string()),
            _ => ApiError::Unexpected(status, body.to_string()),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}
