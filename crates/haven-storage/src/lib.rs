//! Storage seams for the gateway: a small-object key-value store (warm tier)
//! and a large-object blob store (cold tier).
//!
//! Both are traits so the real backends stay external; the crate ships a
//! SQLite implementation for single-node deployments and in-memory
//! implementations for tests.

pub mod blob;
pub mod kv;
pub mod mem;
pub mod sqlite;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub use blob::BlobStore;
pub use kv::KvStore;
pub use mem::{MemoryBlobs, MemoryKv};
pub use sqlite::{SqliteBlobs, SqliteKv};
