/// Error types for the page analyzer service
///
/// Maps the error kinds of the analysis pipeline to HTTP status codes.
/// Errors are converted to JSON bodies for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::fmt;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// URL failed preflight validation
    InvalidUrl(String),

    /// Fetch returned non-2xx or a transport failure
    UrlNotReachable(String),

    /// Fetched body exceeded the configured cap
    ResponseTooLarge(String),

    /// Fetcher or link checker circuit breaker is open
    CircuitBreakerOpen(String),

    /// A deadline was hit
    TimeoutExceeded(String),

    /// Optimistic lock mismatch
    ConcurrentModification(String),

    /// Retry budget exhausted at the broker or outbox level
    MaxRetriesExceeded(String),

    /// Unknown analysis id
    NotFound(String),

    /// Database operation failed
    DatabaseError(String),

    /// Unclassified internal error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            AppError::UrlNotReachable(msg) => write!(f, "URL not reachable: {}", msg),
            AppError::ResponseTooLarge(msg) => write!(f, "Response too large: {}", msg),
            AppError::CircuitBreakerOpen(msg) => write!(f, "Circuit breaker open: {}", msg),
            AppError::TimeoutExceeded(msg) => write!(f, "Timeout exceeded: {}", msg),
            AppError::ConcurrentModification(msg) => write!(f, "Concurrent modification: {}", msg),
            AppError::MaxRetriesExceeded(msg) => write!(f, "Max retries exceeded: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidUrl(_) => "INVALID_URL",
            AppError::UrlNotReachable(_) => "URL_NOT_REACHABLE",
            AppError::ResponseTooLarge(_) => "RESPONSE_TOO_LARGE",
            AppError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            AppError::TimeoutExceeded(_) => "TIMEOUT_EXCEEDED",
            AppError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            AppError::MaxRetriesExceeded(_) => "MAX_RETRIES_EXCEEDED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "INTERNAL",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            AppError::UrlNotReachable(_) => StatusCode::BAD_GATEWAY,
            AppError::ResponseTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TimeoutExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ConcurrentModification(_) => StatusCode::CONFLICT,
            AppError::MaxRetriesExceeded(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_msg = self.to_string();

        HttpResponse::build(status).json(serde_json::json!({
            "error": error_msg,
            "code": self.code(),
            "status": status.as_u16(),
        }))
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<transactional_outbox::OutboxError> for AppError {
    fn from(err: transactional_outbox::OutboxError) -> Self {
        AppError::Internal(err.to_string())
    }
}
