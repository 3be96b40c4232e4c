use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Fetch failed: {0}")]
    FetchError(#[from] FetchError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid config value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required config field: {field}")]
    MissingConfigError { field: String },

    #[error("Config validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("A pipeline run is already in progress")]
    RunInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Database,
    Configuration,
    Processing,
    Concurrency,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ApiError(_) | EtlError::FetchError(_) => ErrorCategory::Network,
            EtlError::DatabaseError(_) => ErrorCategory::Database,
            EtlError::ConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            EtlError::IoError(_)
            | EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. } => ErrorCategory::Processing,
            EtlError::RunInProgress => ErrorCategory::Concurrency,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::RunInProgress => ErrorSeverity::Low,
            EtlError::ApiError(_) | EtlError::FetchError(_) => ErrorSeverity::Medium,
            EtlError::SerializationError(_) | EtlError::ProcessingError { .. } => {
                ErrorSeverity::High
            }
            EtlError::DatabaseError(_)
            | EtlError::IoError(_)
            | EtlError::ConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check API connectivity, credentials and quota, then re-run the pipeline"
            }
            ErrorCategory::Database => {
                "Verify the database url and that the datastore is reachable"
            }
            ErrorCategory::Configuration => {
                "Fix the configuration file and referenced environment variables"
            }
            ErrorCategory::Processing => "Inspect the logged record ids and re-run the pipeline",
            ErrorCategory::Concurrency => {
                "Wait for the in-flight run to finish before starting another"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::RunInProgress => "Another pipeline run is still in progress".to_string(),
            EtlError::MissingConfigError { field } => {
                format!("The configuration is missing '{}'", field)
            }
            other => other.to_string(),
        }
    }
}

/// Closed classification of fetch failures. Timeout, RateLimited and
/// ServerError are retried with backoff; AuthError, BadRequest and NotFound
/// fail the batch immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    AuthError,
    BadRequest,
    NotFound,
    RetriesExhausted,
    Cancelled,
}

impl FetchErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Timeout | FetchErrorKind::RateLimited | FetchErrorKind::ServerError
        )
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// Server-provided backoff hint (Retry-After), when the API sent one.
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn retries_exhausted(attempts: u32, last: &FetchError) -> Self {
        Self {
            kind: FetchErrorKind::RetriesExhausted,
            message: format!("gave up after {} attempts, last error: {}", attempts, last),
            retry_after: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification_is_closed() {
        assert!(FetchErrorKind::Timeout.is_retryable());
        assert!(FetchErrorKind::RateLimited.is_retryable());
        assert!(FetchErrorKind::ServerError.is_retryable());
        assert!(!FetchErrorKind::AuthError.is_retryable());
        assert!(!FetchErrorKind::BadRequest.is_retryable());
        assert!(!FetchErrorKind::NotFound.is_retryable());
        assert!(!FetchErrorKind::RetriesExhausted.is_retryable());
        assert!(!FetchErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_config_errors_are_critical() {
        let err = EtlError::MissingConfigError {
            field: "api.api_keys".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}
