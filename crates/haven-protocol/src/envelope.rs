use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rate-limit response headers attached to HTTP responses that passed (or
/// bounced off) the rate limiter.
pub const HEADER_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATELIMIT_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RATELIMIT_SCOPE: &str = "X-RateLimit-Scope";

/// Client-facing error envelope.
/// Wire: `{ "error": { "code": ..., "message": ..., "retryable": ... },
///          "request_id": ..., "timestamp": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub request_id: String,
    /// Millisecond timestamp.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        retry_after_ms: Option<u64>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
                retryable,
                retry_after_ms,
            },
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }
}
