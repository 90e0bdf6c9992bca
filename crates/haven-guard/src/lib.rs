//! Security gate for inbound messages.
//!
//! Four checks run in order per message; any failure short-circuits with a
//! typed error:
//!
//! 1. rate limit (sliding window over warm kv, fail-open on storage error)
//! 2. PII redaction (applied before storage and before prompt assembly)
//! 3. content filter (prompt injection / jailbreak / length, fail-closed)
//! 4. input sanitization (entity-encode, strip control chars, normalize)

pub mod content;
pub mod gate;
pub mod pii;
pub mod rate_limit;
pub mod sanitize;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("rate limited ({kind}), retry after {retry_after_ms}ms")]
    RateLimited { kind: String, retry_after_ms: u64 },

    #[error("content blocked: {category}")]
    ContentBlocked { category: String },
}

impl From<GuardError> for haven_core::HavenError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::RateLimited { kind, retry_after_ms } => {
                haven_core::HavenError::RateLimited {
                    scope: kind,
                    retry_after_ms,
                }
            }
            GuardError::ContentBlocked { category } => {
                haven_core::HavenError::ContentBlocked { category }
            }
        }
    }
}

pub use gate::{GateOutcome, SecurityGate};
pub use rate_limit::{LimitDecision, LimitKind, RateLimiter};
