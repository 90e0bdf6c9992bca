use async_trait::async_trait;

use crate::Result;

/// Small-object key-value store (warm tier).
///
/// Values are JSON strings; keys follow the documented layouts
/// (`session:<id>`, `memory:<id>`, `archive_pointer:<id>`,
/// `ratelimit:<id>:<kind>`, `log:error:<ts>:<req>`, `workflow:<exec>`, ...).
/// Implementations must be safe to call from many tasks concurrently.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace `key` only if its current value matches `expected`
    /// (`None` = key absent). Returns whether the swap happened.
    ///
    /// Rate-limit window increments go through this so concurrent gate checks
    /// never lose counts.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
