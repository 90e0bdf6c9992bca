use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use haven_core::config::LimitsConfig;
use haven_storage::KvStore;

use crate::GuardError;

/// How many CAS rounds to attempt before treating the window as contended
/// beyond repair and failing open.
const CAS_ATTEMPTS: usize = 8;

/// What kind of traffic a window counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitKind {
    Requests,
    Tokens,
    WebsocketMsg,
    VoiceInput,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Requests => "requests",
            LimitKind::Tokens => "tokens",
            LimitKind::WebsocketMsg => "websocket-msg",
            LimitKind::VoiceInput => "voice-input",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an admitted rate-limit check, surfaced as response headers.
#[derive(Debug, Clone, Copy)]
pub struct LimitDecision {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds when the current window resets.
    pub reset_unix: i64,
}

/// Persisted window state under `ratelimit:<session>:<kind>`.
///
/// Two-bucket sliding window: the previous window's count is weighted by the
/// fraction of it still overlapping "now", which smooths the boundary without
/// keeping per-request timestamps in the kv.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowState {
    window_start_ms: i64,
    count: u32,
    prev_count: u32,
}

/// Sliding-window rate limiter over the warm kv.
///
/// Increments go through compare-and-swap so concurrent checks against the
/// same session never lose counts. On any storage failure the limiter fails
/// open: the request is admitted and a high-severity event is logged.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    limits: LimitsConfig,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, limits: LimitsConfig) -> Self {
        Self { kv, limits }
    }

    /// Check-and-count one unit of `kind` traffic for `session`.
    pub async fn check(
        &self,
        session: &str,
        kind: LimitKind,
    ) -> Result<LimitDecision, GuardError> {
        self.charge(session, kind, 1).await
    }

    /// Check-and-count `amount` units (token budgets charge more than 1).
    pub async fn charge(
        &self,
        session: &str,
        kind: LimitKind,
        amount: u32,
    ) -> Result<LimitDecision, GuardError> {
        let limit = self.limit_for(kind);
        let window_ms = self.window_ms_for(kind);
        let burst = self.limits.burst_allowance;
        let key = format!("ratelimit:{}:{}", session, kind.as_str());
        let now = chrono::Utc::now().timestamp_millis();

        for _ in 0..CAS_ATTEMPTS {
            let current = match self.kv.get(&key).await {
                Ok(v) => v,
                Err(e) => {
                    // Fail-open: a broken limiter must not take chat down.
                    error!(session, kind = %kind, error = %e, "rate-limit read failed, admitting");
                    return Ok(self.open_decision(limit, window_ms, now));
                }
            };

            let mut state = current
                .as_deref()
                .and_then(|v| serde_json::from_str::<WindowState>(v).ok())
                .unwrap_or(WindowState {
                    window_start_ms: now,
                    count: 0,
                    prev_count: 0,
                });

            // Roll the window forward.
            if now - state.window_start_ms >= window_ms {
                let windows_elapsed = (now - state.window_start_ms) / window_ms;
                state.prev_count = if windows_elapsed == 1 { state.count } else { 0 };
                state.count = 0;
                state.window_start_ms += windows_elapsed * window_ms;
            }

            let overlap =
                1.0 - (now - state.window_start_ms) as f64 / window_ms as f64;
            let effective =
                state.prev_count as f64 * overlap + state.count as f64;

            if effective + amount as f64 > (limit + burst) as f64 {
                let retry_after_ms =
                    (state.window_start_ms + window_ms - now).max(1) as u64;
                warn!(session, kind = %kind, effective, "rate limit exceeded");
                return Err(GuardError::RateLimited {
                    kind: kind.as_str().to_string(),
                    retry_after_ms,
                });
            }

            state.count += amount;
            let serialized = serde_json::to_string(&state)
                .unwrap_or_else(|_| "{}".to_string());

            match self
                .kv
                .compare_and_swap(&key, current.as_deref(), &serialized)
                .await
            {
                Ok(true) => {
                    let used = effective as u32 + amount;
                    return Ok(LimitDecision {
                        limit,
                        remaining: (limit + burst).saturating_sub(used),
                        reset_unix: (state.window_start_ms + window_ms) / 1000,
                    });
                }
                Ok(false) => continue, // lost the race, re-read
                Err(e) => {
                    error!(session, kind = %kind, error = %e, "rate-limit write failed, admitting");
                    return Ok(self.open_decision(limit, window_ms, now));
                }
            }
        }

        // Pathological contention — admit rather than block the session.
        warn!(session, kind = %kind, "rate-limit CAS contention, admitting");
        Ok(self.open_decision(limit, window_ms, now))
    }

    fn open_decision(&self, limit: u32, window_ms: i64, now: i64) -> LimitDecision {
        LimitDecision {
            limit,
            remaining: limit,
            reset_unix: (now + window_ms) / 1000,
        }
    }

    fn limit_for(&self, kind: LimitKind) -> u32 {
        match kind {
            LimitKind::Requests => self.limits.rate_limit_per_minute,
            LimitKind::Tokens => self.limits.token_limit_per_hour,
            LimitKind::WebsocketMsg => self.limits.ws_msg_per_minute,
            LimitKind::VoiceInput => self.limits.voice_per_minute,
        }
    }

    fn window_ms_for(&self, kind: LimitKind) -> i64 {
        match kind {
            LimitKind::Tokens => 3_600_000,
            _ => 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haven_storage::{MemoryKv, StorageError};

    fn limiter(rate_per_minute: u32, burst: u32) -> RateLimiter {
        let limits = LimitsConfig {
            rate_limit_per_minute: rate_per_minute,
            burst_allowance: burst,
            ..LimitsConfig::default()
        };
        RateLimiter::new(Arc::new(MemoryKv::new()), limits)
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let rl = limiter(30, 0);
        for i in 0..30 {
            rl.check("s1", LimitKind::Requests)
                .await
                .unwrap_or_else(|e| panic!("request {i} should pass: {e}"));
        }
        let err = rl.check("s1", LimitKind::Requests).await.unwrap_err();
        match err {
            GuardError::RateLimited { retry_after_ms, .. } => {
                assert!(retry_after_ms > 0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn burst_allowance_extends_the_window() {
        let rl = limiter(5, 3);
        for _ in 0..8 {
            rl.check("s1", LimitKind::Requests).await.unwrap();
        }
        assert!(rl.check("s1", LimitKind::Requests).await.is_err());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let rl = limiter(1, 0);
        rl.check("a", LimitKind::Requests).await.unwrap();
        rl.check("b", LimitKind::Requests).await.unwrap();
        assert!(rl.check("a", LimitKind::Requests).await.is_err());
    }

    #[tokio::test]
    async fn kinds_do_not_share_windows() {
        let rl = limiter(1, 0);
        rl.check("s", LimitKind::Requests).await.unwrap();
        rl.check("s", LimitKind::WebsocketMsg).await.unwrap();
    }

    struct BrokenKv;

    #[async_trait]
    impl haven_storage::KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> haven_storage::Result<Option<String>> {
            Err(StorageError::Backend("down".into()))
        }
        async fn put(&self, _key: &str, _value: &str) -> haven_storage::Result<()> {
            Err(StorageError::Backend("down".into()))
        }
        async fn delete(&self, _key: &str) -> haven_storage::Result<()> {
            Err(StorageError::Backend("down".into()))
        }
        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&str>,
            _new: &str,
        ) -> haven_storage::Result<bool> {
            Err(StorageError::Backend("down".into()))
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> haven_storage::Result<Vec<String>> {
            Err(StorageError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn storage_failure_fails_open() {
        let rl = RateLimiter::new(Arc::new(BrokenKv), LimitsConfig::default());
        // Every check admits despite the dead backend.
        for _ in 0..100 {
            rl.check("s", LimitKind::Requests).await.unwrap();
        }
    }
}
