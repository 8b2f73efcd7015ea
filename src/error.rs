use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request: bad JSON, oversized body, invalid parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Empty query after trimming
    #[error("Query parameter 'q' is required")]
    MissingQuery,

    /// Circuit open or retries exhausted against a backend
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Deadline exceeded
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Recoverable I/O failure from a backend
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Non-retryable indexing failure, bound for the dead-letter queue
    #[error("Terminal failure: {0}")]
    Terminal(String),

    /// Context ended before completion; never surfaced to callers
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) | AppError::MissingQuery => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::MissingQuery => "missing_query",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Timeout(_) => "timeout",
            AppError::Transient(_) => "transient",
            AppError::Terminal(_) => "terminal",
            AppError::Cancelled(_) => "cancelled",
            AppError::Configuration(_) => "configuration_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether this error should be treated as a backend failure by the
    /// fallback chain (as opposed to a caller mistake).
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            AppError::BackendUnavailable(_) | AppError::Timeout(_) | AppError::Transient(_)
        )
    }
}

/// Convert AppError to HTTP response. Backend details never leak to callers:
/// everything that is not a caller mistake collapses to a generic 500.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let message = if status == StatusCode::BAD_REQUEST {
            self.to_string()
        } else {
            tracing::error!(error_code = code, error = %self, "request failed");
            "Search service temporarily unavailable".to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Transient(err.to_string())
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Transient(format!("redis: {err}"))
    }
}

impl From<clickhouse::error::Error> for AppError {
    fn from(err: clickhouse::error::Error) -> Self {
        AppError::Transient(format!("clickhouse: {err}"))
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Transient(format!("kafka: {err}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_map_to_400() {
        assert_eq!(
            AppError::MissingQuery.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidRequest("bad json".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_backend_errors_map_to_500() {
        for err in [
            AppError::BackendUnavailable("es".into()),
            AppError::Timeout("deadline".into()),
            AppError::Transient("io".into()),
            AppError::Internal("oops".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_fallback_trigger_classification() {
        assert!(AppError::BackendUnavailable("es".into()).is_backend_failure());
        assert!(AppError::Timeout("t".into()).is_backend_failure());
        assert!(AppError::Transient("t".into()).is_backend_failure());
        assert!(!AppError::MissingQuery.is_backend_failure());
        assert!(!AppError::Cancelled("c".into()).is_backend_failure());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::MissingQuery.error_code(), "missing_query");
        assert_eq!(
            AppError::BackendUnavailable("x".into()).error_code(),
            "backend_unavailable"
        );
    }
}
