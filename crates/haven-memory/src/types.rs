use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use haven_core::types::{MessageId, Role, SessionId, SessionStatus};

/// Messages returned in a context snapshot.
pub const CONTEXT_WINDOW: usize = 20;
/// Message ids remembered for append idempotence, beyond the live window.
pub const DEDUP_WINDOW: usize = 256;

/// Persisted session identity and lifecycle (kv key `session:<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: SessionStatus,
    /// Unix ms.
    pub created_at: i64,
    pub last_activity: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionRecord {
    pub fn new(id: SessionId, user_id: Option<String>, metadata: HashMap<String, String>) -> Self {
        let now = haven_core::types::now_ms();
        Self {
            id,
            user_id,
            status: SessionStatus::Active,
            created_at: now,
            last_activity: now,
            metadata,
        }
    }
}

/// One chat message as stored in memory (append-only within a session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    /// Monotonic milliseconds; ties broken by insertion order.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl StoredMessage {
    pub fn new(session_id: SessionId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            role,
            content: content.into(),
            timestamp: haven_core::types::now_ms(),
            tool_calls: None,
            metrics: None,
        }
    }
}

/// The bounded conversation record (kv key `memory:<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub session_id: SessionId,
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub resolved_issues: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary_at: Option<i64>,
    #[serde(default)]
    pub messages_since_summary: usize,
    /// Transcript of trimmed messages waiting to be folded into the summary.
    #[serde(default)]
    pub pending_summary_source: String,
    /// Recently appended message ids, for idempotent re-appends.
    #[serde(default)]
    pub recent_ids: VecDeque<String>,
}

impl ConversationMemory {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            summary: String::new(),
            topics: BTreeSet::new(),
            resolved_issues: BTreeSet::new(),
            last_summary_at: None,
            messages_since_summary: 0,
            pending_summary_source: String::new(),
            recent_ids: VecDeque::new(),
        }
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.recent_ids.iter().any(|seen| seen == id)
    }

    pub fn remember_id(&mut self, id: String) {
        self.recent_ids.push_back(id);
        while self.recent_ids.len() > DEDUP_WINDOW {
            self.recent_ids.pop_front();
        }
    }
}

/// Read-only derived view handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: SessionId,
    pub summary: String,
    /// The last ≤ 20 messages, oldest first.
    pub recent_messages: Vec<StoredMessage>,
    pub topics: BTreeSet<String>,
    pub resolved_issues: BTreeSet<String>,
}

/// Archival pointer left in the warm kv (`archive_pointer:<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivePointer {
    pub session_id: SessionId,
    pub blob_path: String,
    /// Unix ms.
    pub archived_at: i64,
}

/// The JSON document written to the cold store on archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub session: SessionRecord,
    pub memory: ConversationMemory,
}
