use std::sync::Arc;

use tracing::debug;

use haven_core::config::LimitsConfig;
use haven_storage::KvStore;

use crate::rate_limit::{LimitDecision, LimitKind, RateLimiter};
use crate::{content, pii, sanitize, GuardError};

/// The cleaned message plus the rate-limit decision for response headers.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub content: String,
    pub rate: LimitDecision,
}

/// Ordered front-end over the four gate checks.
///
/// `admit` runs: rate limit → PII redaction → content filter → sanitization.
/// The content filter sees redacted text, so a blocked message never echoes
/// raw PII into logs either.
pub struct SecurityGate {
    limiter: RateLimiter,
    max_content_chars: usize,
}

impl SecurityGate {
    pub fn new(kv: Arc<dyn KvStore>, limits: LimitsConfig) -> Self {
        let max_content_chars = limits.max_content_chars;
        Self {
            limiter: RateLimiter::new(kv, limits),
            max_content_chars,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run all checks for one inbound message.
    pub async fn admit(
        &self,
        session: &str,
        kind: LimitKind,
        raw_content: &str,
    ) -> Result<GateOutcome, GuardError> {
        let rate = self.limiter.check(session, kind).await?;

        let redacted = pii::redact(raw_content);
        content::check(&redacted, self.max_content_chars)?;
        let clean = sanitize::sanitize(&redacted);

        debug!(session, kind = %kind, chars = clean.len(), "message admitted");
        Ok(GateOutcome {
            content: clean,
            rate,
        })
    }
}
