use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use haven_storage::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix ms.
    pub timestamp: i64,
    pub level: LogLevel,
    pub component: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LogError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        component: impl Into<String>,
        request_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            level,
            component: component.into(),
            request_id: request_id.into(),
            session_id: None,
            user_id: None,
            message: message.into(),
            metadata: HashMap::new(),
            error: None,
            latency_ms: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_error(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(LogError {
            name: name.into(),
            message: message.into(),
            stack: None,
        });
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Structured log sink.
///
/// Every entry is emitted through `tracing`; error-level entries are
/// additionally persisted to the warm kv under `log:error:<ts>:<request_id>`
/// and swept after the retention window.
pub struct LogService {
    kv: Arc<dyn KvStore>,
    retention_ms: i64,
}

impl LogService {
    pub fn new(kv: Arc<dyn KvStore>, retention_days: u64) -> Self {
        Self {
            kv,
            retention_ms: (retention_days as i64) * 24 * 3600 * 1000,
        }
    }

    pub async fn record(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => debug!(
                component = %entry.component,
                request_id = %entry.request_id,
                "{}", entry.message
            ),
            LogLevel::Info => info!(
                component = %entry.component,
                request_id = %entry.request_id,
                "{}", entry.message
            ),
            LogLevel::Warn => warn!(
                component = %entry.component,
                request_id = %entry.request_id,
                "{}", entry.message
            ),
            LogLevel::Error => {
                error!(
                    component = %entry.component,
                    request_id = %entry.request_id,
                    err = entry.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                    "{}", entry.message
                );
                self.persist_error(&entry).await;
            }
        }
    }

    /// Stored error entries, newest-last (key order is timestamp order).
    pub async fn recent_errors(&self, limit: usize) -> Vec<LogEntry> {
        let keys = match self.kv.keys_with_prefix("log:error:").await {
            Ok(k) => k,
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::new();
        for key in keys.iter().rev().take(limit) {
            if let Ok(Some(raw)) = self.kv.get(key).await {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&raw) {
                    out.push(entry);
                }
            }
        }
        out
    }

    async fn persist_error(&self, entry: &LogEntry) {
        let key = format!("log:error:{}:{}", entry.timestamp, entry.request_id);
        let value = match serde_json::to_string(entry) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "error log entry not serializable");
                return;
            }
        };
        if let Err(e) = self.kv.put(&key, &value).await {
            // The log sink must never take the request down.
            warn!(error = %e, "error log persistence failed");
            return;
        }
        self.sweep_expired().await;
    }

    async fn sweep_expired(&self) {
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_ms;
        let keys = match self.kv.keys_with_prefix("log:error:").await {
            Ok(k) => k,
            Err(_) => return,
        };
        for key in keys {
            // key layout: log:error:<ts>:<request_id>
            let ts = key
                .split(':')
                .nth(2)
                .and_then(|t| t.parse::<i64>().ok());
            if let Some(ts) = ts {
                if ts < cutoff {
                    let _ = self.kv.delete(&key).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_storage::MemoryKv;

    #[tokio::test]
    async fn error_entries_are_persisted() {
        let kv = Arc::new(MemoryKv::new());
        let log = LogService::new(kv.clone(), 7);

        log.record(
            LogEntry::new(LogLevel::Error, "pipeline", "r-1", "llm call failed")
                .with_error("UpstreamUnavailable", "timeout")
                .with_session("s-1"),
        )
        .await;

        let errors = log.recent_errors(10).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].request_id, "r-1");
        assert_eq!(errors[0].session_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn info_entries_are_not_persisted() {
        let kv = Arc::new(MemoryKv::new());
        let log = LogService::new(kv.clone(), 7);
        log.record(LogEntry::new(LogLevel::Info, "pipeline", "r-2", "ok")).await;
        assert!(log.recent_errors(10).await.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let kv = Arc::new(MemoryKv::new());
        // Zero retention: everything is expired immediately.
        let log = LogService::new(kv.clone(), 0);
        log.record(LogEntry::new(LogLevel::Error, "a", "r-3", "boom")).await;
        log.record(LogEntry::new(LogLevel::Error, "a", "r-4", "boom again")).await;
        // The second persist sweeps the first (and possibly both).
        let remaining = kv.keys_with_prefix("log:error:").await.unwrap();
        assert!(remaining.len() <= 1);
    }
}
