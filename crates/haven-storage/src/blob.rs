use async_trait::async_trait;

use crate::Result;

/// Large-object blob store (cold tier).
///
/// Holds archived conversations under paths like
/// `archive/<session>/<iso-timestamp>.json`. Writes are idempotent: putting
/// the same path twice overwrites.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a blob. Deleting a missing path is not an error — archive
    /// compensation relies on this being safe to repeat.
    async fn delete(&self, path: &str) -> Result<()>;

    /// All blob paths starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
