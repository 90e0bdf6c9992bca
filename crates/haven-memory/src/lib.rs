//! Per-session conversation memory.
//!
//! Each session is owned by exactly one single-writer actor; every operation
//! against a session serializes through its mailbox. Hot state persists to
//! the warm kv (`session:<id>`, `memory:<id>`), archives go to the cold blob
//! store with a pointer left in the kv.

pub mod actor;
pub mod registry;
pub mod summarize;
pub mod topics;
pub mod types;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("session has ended: {id}")]
    SessionEnded { id: String },

    #[error("archived data corrupted: {0}")]
    Corrupted(String),

    /// A kv/blob read failed — safe to retry.
    #[error("storage read failed: {0}")]
    StorageRead(String),

    /// A hot-state write failed — the operation is rejected with no partial
    /// effects and must not be retried automatically.
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("session mailbox overflowed or actor stopped")]
    MailboxClosed,

    #[error("internal: {0}")]
    Internal(String),
}

impl MemoryError {
    pub(crate) fn read(e: haven_storage::StorageError) -> Self {
        MemoryError::StorageRead(e.to_string())
    }

    pub(crate) fn write(e: haven_storage::StorageError) -> Self {
        MemoryError::StorageWrite(e.to_string())
    }
}

impl From<MemoryError> for haven_core::HavenError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::NotFound { id } => haven_core::HavenError::SessionNotFound { id },
            MemoryError::SessionEnded { id } => haven_core::HavenError::SessionEnded { id },
            MemoryError::Corrupted(msg) => haven_core::HavenError::Corrupted(msg),
            MemoryError::StorageRead(msg) => haven_core::HavenError::StorageRead(msg),
            MemoryError::StorageWrite(msg) => haven_core::HavenError::StorageWrite(msg),
            MemoryError::MailboxClosed => {
                haven_core::HavenError::Internal("session mailbox overflowed".to_string())
            }
            MemoryError::Internal(msg) => haven_core::HavenError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

pub use actor::ActorHandle;
pub use registry::SessionRegistry;
pub use types::{ContextSnapshot, ConversationMemory, SessionRecord, StoredMessage};
