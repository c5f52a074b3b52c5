//! Error types for reconciliation and execution.
//!
//! Remote failures are categorized so the execution engine can decide
//! between retrying, failing the action, or short-circuiting dependents.
//! Validation failures are a separate type: they abort a run before any
//! action is dispatched.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Categories of directory errors for retry logic and operator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Throttling, timeouts and transient network faults (retryable)
    Transient,
    /// Authorization denied
    Permission,
    /// Referenced user or group does not exist
    NotFound,
    /// Uniqueness violation or concurrent modification
    Conflict,
    /// Request rejected as malformed by the directory
    InvalidRequest,
    /// Local validation or safety gate
    Validation,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Short machine-friendly code used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Permission => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Validation => "VALIDATION",
            Self::Other => "UNKNOWN_ERROR",
        }
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Rate limit, timeout or transient network issue",
            Self::Permission => "Permission denied",
            Self::NotFound => "User or group not found",
            Self::Conflict => "Conflicting resource",
            Self::InvalidRequest => "Request rejected by the directory",
            Self::Validation => "Validation failed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transient => {
                "API rate limit or network issue; lower --max-workers or raise retry delays and rerun"
            }
            Self::Permission => "Check the IAM permissions of the configured AWS profile",
            Self::NotFound => "The user or group may have been deleted; rerun to re-plan",
            Self::Conflict => {
                "The user may already exist or is being modified elsewhere; check for duplicate usernames or emails"
            }
            Self::InvalidRequest => "Check the user's data format in the source file",
            Self::Validation => "Fix the source file or configuration and rerun",
            Self::Other => "Check the log for details and contact an administrator if it persists",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors raised by directory operations and the execution engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Directory throttled the request
    #[error("throttled: {message}")]
    Throttled {
        /// Message returned by the directory
        message: String,
    },

    /// Remote call exceeded the per-operation timeout
    #[error("timed out: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Transient network fault or server-side error
    #[error("network error: {message}")]
    Network {
        /// Transport or server error detail
        message: String,
    },

    /// Authorization denied
    #[error("permission denied: {message}")]
    Permission {
        /// Denial detail
        message: String,
    },

    /// Referenced user or group is missing
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Uniqueness violation
    #[error("conflict: {message}")]
    Conflict {
        /// Conflict detail
        message: String,
    },

    /// Request rejected as malformed
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Rejection detail
        message: String,
    },

    /// Plan contains deletions but no confirmation was supplied
    #[error("plan contains {count} user deletion(s) but deletion was not confirmed")]
    DeletionNotConfirmed {
        /// Number of delete actions in the plan
        count: usize,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Throttled { .. } | Error::Timeout { .. } | Error::Network { .. } => {
                ErrorCategory::Transient
            }
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            Error::DeletionNotConfirmed { .. } => ErrorCategory::Validation,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error is a throttling signal (feeds concurrency adaptation).
    pub fn is_throttling(&self) -> bool {
        matches!(self, Error::Throttled { .. })
    }
}

/// Result type for directory and execution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal validation failures that abort a run before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The same employee id appears more than once in the desired roster
    #[error("duplicate employee id '{employee_id}' in desired roster (rows {rows:?})")]
    DuplicateEmployeeId {
        /// Duplicated key
        employee_id: String,
        /// Source rows where the key appears, when known
        rows: Vec<usize>,
    },

    /// Username template is unusable
    #[error("malformed username template '{template}': {reason}")]
    MalformedTemplate {
        /// Template as configured
        template: String,
        /// Why it was rejected
        reason: String,
    },

    /// A desired user has no derivable username
    #[error("cannot derive username for row {row}: employee id is empty")]
    UnresolvableEmployeeId {
        /// Source row (0 when unknown)
        row: usize,
    },

    /// A configured service group does not exist in the directory
    #[error("group '{group}' not found in the directory")]
    GroupNotFound {
        /// Configured group name
        group: String,
    },

    /// The planned actions violate a plan invariant
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
}

/// Plan invariant violations, raised by the plan builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// More than one create/delete for the same user
    #[error("user '{employee_id}' already has a create or delete action")]
    DuplicateLifecycle {
        /// User key
        employee_id: String,
    },

    /// Membership actions for the same group pull in different directions
    #[error("contradictory or repeated membership actions for '{employee_id}' in group {group_id}")]
    ContradictoryMembership {
        /// User key
        employee_id: String,
        /// Group involved
        group_id: String,
    },

    /// An action was pushed out of dependency order
    #[error("misordered action for '{employee_id}': {reason}")]
    Misordered {
        /// User key
        employee_id: String,
        /// Which ordering rule was broken
        reason: String,
    },
}
