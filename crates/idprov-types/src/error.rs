use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error kinds.
///
/// Activities may raise any kind string; the constants below are the kinds
/// the orchestrator itself produces or that built-in activities share.
pub mod kinds {
    /// Catch/Retry sentinel matching every non-fatal kind.
    pub const ALL: &str = "ALL";

    // Structural
    pub const UNHANDLED_CHOICE: &str = "UnhandledChoice";
    pub const MAP_FAILED: &str = "MapFailed";
    pub const RELAUNCH_LIMIT_EXCEEDED: &str = "RelaunchLimitExceeded";
    pub const ACTIVITY_NOT_REGISTERED: &str = "ActivityNotRegistered";
    pub const INVALID_PATH: &str = "InvalidPath";
    pub const PATH_NOT_FOUND: &str = "PathNotFound";
    pub const TYPE_MISMATCH: &str = "TypeMismatch";
    pub const TASK_FAILED: &str = "TaskFailed";
    pub const DOCUMENT_TOO_LARGE: &str = "DocumentTooLarge";
    pub const EXPRESSION_FAILED: &str = "ExpressionFailed";
    pub const STATE_FAILED: &str = "StateFailed";

    // Fatal
    pub const EXECUTION_TIMEOUT: &str = "ExecutionTimeout";
    pub const CALLBACK_TOKEN_CONSUMED: &str = "CallbackTokenConsumed";
    pub const CALLBACK_TOKEN_EXPIRED: &str = "CallbackTokenExpired";
    pub const CALLBACK_DELIVERY_UNKNOWN: &str = "CallbackDeliveryUnknown";

    // Transport faults. Gateways map every transport failure onto one of these.
    pub const TIMEOUT: &str = "Timeout";
    pub const CONNECTION_ERROR: &str = "ConnectionError";
    pub const THROTTLING: &str = "ThrottlingException";
    pub const HTTP_ERROR: &str = "HTTPError";

    // Long-poll task results
    pub const TASK_RESULT_NOT_FOUND: &str = "TaskResultNotFoundError";
    pub const TASK_NOT_COMPLETED: &str = "OnboardingTaskNotCompleted";
    pub const TASK_RESULT_FAILED: &str = "OnboardingTaskFailed";
    pub const NON_RETRIABLE: &str = "NonRetriableError";

    /// Cause text recorded for an unmatched Choice.
    pub const UNHANDLED_CHOICE_CAUSE: &str = "Choice state failure due to no matching choice";

    /// Fatal kinds abort the execution: they are never retried and no Catch
    /// rule (not even `ALL`) matches them.
    pub fn is_fatal(kind: &str) -> bool {
        matches!(
            kind,
            EXECUTION_TIMEOUT
                | CALLBACK_TOKEN_CONSUMED
                | CALLBACK_TOKEN_EXPIRED
                | CALLBACK_DELIVERY_UNKNOWN
        )
    }
}

/// Structured error written into documents and execution records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The error kind matched by Retry/Catch rules.
    pub error: String,
    /// Human-readable cause, passed through verbatim.
    pub cause: String,
}

impl ErrorInfo {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: cause.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        kinds::is_fatal(&self.error)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.error, "cause": self.cause })
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.cause)
    }
}

/// Errors from repository operations (used by trait definitions in idprov-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
