//! Error types for directory API operations.
//!
//! SDK failures are flattened into [`Error`]: service errors keep their AWS
//! error code, message and HTTP status, and codes are categorized so callers
//! can decide whether to retry.

use aws_sdk_identitystore::config::http::HttpResponse;
use aws_sdk_identitystore::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::error::Error as StdError;
use std::fmt;

/// Result type alias for directory API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes that signal throttling.
pub const THROTTLING_CODES: [&str; 5] = [
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "Throttling",
    "SlowDown",
];

/// Categories of API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request rate exceeded (retryable).
    Throttling,
    /// Timeouts, connection failures and server errors (retryable).
    Transient,
    /// Credentials rejected or action not allowed.
    Permission,
    /// User, group or membership does not exist.
    NotFound,
    /// Resource already exists or is being modified.
    Conflict,
    /// Request rejected as malformed.
    Validation,
    /// Account quota reached.
    Quota,
    /// Credentials could not be loaded locally.
    Credentials,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttling | Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Throttling => "API rate limit exceeded",
            Self::Transient => "Network or service issue",
            Self::Permission => "Permission denied",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Resource conflict",
            Self::Validation => "Invalid request",
            Self::Quota => "Service quota exceeded",
            Self::Credentials => "AWS credentials unavailable",
            Self::Other => "Unexpected error",
        }
    }

    /// Categorize an AWS error code, falling back to the HTTP status.
    #[must_use]
    pub fn from_api_code(code: &str, status: u16) -> Self {
        match code {
            c if THROTTLING_CODES.contains(&c) => Self::Throttling,
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException"
            | "MissingAuthenticationTokenException" => Self::Permission,
            "ResourceNotFoundException" => Self::NotFound,
            "ConflictException" => Self::Conflict,
            "ValidationException" | "SerializationException" => Self::Validation,
            "ServiceQuotaExceededException" => Self::Quota,
            "InternalServerException" | "ServiceUnavailableException" => Self::Transient,
            _ => match status {
                429 => Self::Throttling,
                401 | 403 => Self::Permission,
                404 => Self::NotFound,
                409 => Self::Conflict,
                400 => Self::Validation,
                s if s >= 500 => Self::Transient,
                _ => Self::Other,
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during directory API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Service returned an error response.
    #[error("{operation} failed with {code} (HTTP {status}): {message}")]
    Api {
        /// Operation name, such as `CreateUser`.
        operation: String,
        /// AWS error code.
        code: String,
        /// Error message from the service.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// Request exceeded the configured timeout.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation name.
        operation: String,
    },

    /// Request could not be sent or the connection broke.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Request could not be built, usually because no credentials resolved.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Response body did not match the expected shape.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Flatten an SDK failure for `operation`.
    pub fn from_sdk<E>(operation: &str, err: SdkError<E, HttpResponse>) -> Self
    where
        E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    {
        let operation = operation.to_string();
        let error = match &err {
            SdkError::ServiceError(context) => {
                let status = context.raw().status().as_u16();
                let service = context.err();
                Self::Api {
                    code: service
                        .code()
                        .map_or_else(|| format!("HTTP{status}"), str::to_string),
                    message: service.message().unwrap_or_default().to_string(),
                    status,
                    operation,
                }
            }
            SdkError::TimeoutError(_) => Self::Timeout { operation },
            SdkError::DispatchFailure(failure) if failure.is_timeout() => {
                Self::Timeout { operation }
            }
            SdkError::DispatchFailure(_) => Self::Http(DisplayErrorContext(&err).to_string()),
            SdkError::ConstructionFailure(_) => {
                Self::Credentials(DisplayErrorContext(&err).to_string())
            }
            SdkError::ResponseError(_) => {
                Self::InvalidResponse(DisplayErrorContext(&err).to_string())
            }
            _ => Self::Other(DisplayErrorContext(&err).to_string()),
        };
        log::debug!("{error}");
        error
    }

    /// AWS error code, when the service returned one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { code, status, .. } => ErrorCategory::from_api_code(code, *status),
            Self::Timeout { .. } | Self::Http(_) => ErrorCategory::Transient,
            Self::Credentials(_) => ErrorCategory::Credentials,
            Self::InvalidResponse(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the service throttled the request.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        self.category() == ErrorCategory::Throttling
    }
}
