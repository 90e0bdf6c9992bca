use thiserror::Error;

/// Unified error type for the whole gateway.
///
/// Every component failure maps onto one of these variants so the request
/// pipeline can pattern-match to decide the wire code, the HTTP status, and
/// whether a retry is worthwhile.
#[derive(Debug, Error)]
pub enum HavenError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Message too long: {len} chars (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session has ended: {id}")]
    SessionEnded { id: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Rate limit exceeded for {scope}, retry after {retry_after_ms}ms")]
    RateLimited { scope: String, retry_after_ms: u64 },

    #[error("Token budget exhausted, retry after {retry_after_ms}ms")]
    TokenLimited { retry_after_ms: u64 },

    #[error("Content blocked: {category}")]
    ContentBlocked { category: String },

    #[error("Storage read failed: {0}")]
    StorageRead(String),

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Stored data corrupted: {0}")]
    Corrupted(String),

    #[error("Upstream service unavailable: {0}")]
    Upstream(String),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("Workflow execution {execution_id} failed: {reason}")]
    WorkflowFailed { execution_id: String, reason: String },

    #[error("Service degraded: {0}")]
    Degraded(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HavenError {
    /// Short error code string carried on the client-facing error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            HavenError::InvalidRequest(_) => "INVALID_REQUEST_FORMAT",
            HavenError::MissingField { .. } => "MISSING_REQUIRED_FIELD",
            HavenError::InvalidField { .. } => "INVALID_FIELD_VALUE",
            HavenError::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            HavenError::InvalidSession(_) => "INVALID_SESSION",
            HavenError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            HavenError::SessionEnded { .. } => "INVALID_SESSION",
            HavenError::PermissionDenied { .. } => "PERMISSION_DENIED",
            HavenError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            HavenError::TokenLimited { .. } => "TOKEN_LIMIT_EXCEEDED",
            HavenError::ContentBlocked { .. } => "CONTENT_BLOCKED",
            HavenError::StorageRead(_) => "STORAGE_ERROR",
            HavenError::StorageWrite(_) => "STORAGE_ERROR",
            HavenError::Corrupted(_) => "STORAGE_ERROR",
            HavenError::Upstream(_) => "AI_SERVICE_UNAVAILABLE",
            HavenError::Timeout { .. } => "TIMEOUT",
            HavenError::ToolFailed { .. } => "TOOL_EXECUTION_FAILED",
            HavenError::WorkflowFailed { .. } => "WORKFLOW_EXECUTION_FAILED",
            HavenError::Degraded(_) => "SERVICE_DEGRADED",
            HavenError::Serialization(_) => "INTERNAL_ERROR",
            HavenError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the pipeline maps this error onto.
    pub fn http_status(&self) -> u16 {
        match self {
            HavenError::InvalidRequest(_)
            | HavenError::MissingField { .. }
            | HavenError::InvalidField { .. }
            | HavenError::MessageTooLong { .. }
            | HavenError::InvalidSession(_)
            | HavenError::SessionEnded { .. }
            | HavenError::ContentBlocked { .. } => 400,
            HavenError::PermissionDenied { .. } => 403,
            HavenError::SessionNotFound { .. } => 404,
            HavenError::RateLimited { .. } | HavenError::TokenLimited { .. } => 429,
            HavenError::Upstream(_)
            | HavenError::Degraded(_)
            | HavenError::Timeout { .. }
            | HavenError::StorageRead(_) => 503,
            _ => 500,
        }
    }

    /// Whether the caller may retry the same request and expect it to succeed.
    ///
    /// Validation, authorization, not-found, rate-limit and content-block
    /// failures are never retryable. Storage failures split: a failed read is
    /// retried with backoff like any upstream hiccup, while a failed hot-state
    /// write is rejected outright so no partial effects are replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HavenError::Upstream(_)
                | HavenError::Timeout { .. }
                | HavenError::Degraded(_)
                | HavenError::StorageRead(_)
        )
    }

    /// Milliseconds the client should wait before retrying, when known.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            HavenError::RateLimited { retry_after_ms, .. }
            | HavenError::TokenLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HavenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429_with_retry_after() {
        let err = HavenError::RateLimited {
            scope: "requests".into(),
            retry_after_ms: 1500,
        };
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_errors_are_retryable_503() {
        let err = HavenError::Upstream("model down".into());
        assert_eq!(err.http_status(), 503);
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_write_failures_are_not_retryable() {
        let err = HavenError::StorageWrite("disk full".into());
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert_eq!(err.http_status(), 500);
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_read_failures_are_retryable_503() {
        let err = HavenError::StorageRead("kv unreachable".into());
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert_eq!(err.http_status(), 503);
        assert!(err.is_retryable());
    }

    #[test]
    fn content_blocked_is_a_400_with_category_code() {
        let err = HavenError::ContentBlocked {
            category: "prompt_injection".into(),
        };
        assert_eq!(err.code(), "CONTENT_BLOCKED");
        assert_eq!(err.http_status(), 400);
    }
}
