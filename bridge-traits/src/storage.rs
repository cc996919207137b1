//! Storage Abstractions
//!
//! Two durable collaborators back the playback core:
//!
//! - [`BlobStore`] holds offline media payloads and their metadata records.
//! - [`StateStore`] holds small whole-state snapshots such as the position ledger.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Durable key/blob storage.
///
/// Keys are opaque `/`-separated strings. Implementations must guarantee that
/// `put` is atomic per key: a concurrent `get` observes either the previous
/// value or the complete new one, never a partial write. Read-after-write
/// consistency within one process is assumed by callers.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::BlobStore;
///
/// async fn stash(store: &dyn BlobStore, payload: Bytes) -> Result<()> {
///     store.put("payload/abc", payload).await?;
///     assert!(store.get("payload/abc").await?.is_some());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous value atomically.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read the value under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Remove `key`. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List every key starting with `prefix`, in no particular order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check for a key without reading its value.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Durable small-state storage.
///
/// Used for whole-state snapshots keyed by a single process-wide key.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
