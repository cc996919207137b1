//! # Offline Cache Module
//!
//! Durable storage for fully downloaded episodes.
//!
//! ## Overview
//!
//! The offline cache lets a listener play pinned episodes without network access.
//! Key features:
//! - Persistent storage through the host's [`BlobStore`](bridge_traits::BlobStore)
//! - Staged payload writes; metadata is published only once the payload is durable
//! - Per-episode writer serialization
//! - SHA-256 verification on every read
//! - Optional best-effort capacity limit (no eviction)
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     OfflineCacheStore                  │
//! │  - has() / get() / list_metadata()     │
//! │  - put() / put_unless_canceled()       │
//! │  - delete() / clear()                  │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> meta/{guid}            (JSON record)
//!          └──> payload/{guid}/{uuid}  (raw bytes)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, OfflineCacheStore};
//!
//! # async fn example(store: &OfflineCacheStore) -> core_playback::Result<()> {
//! store.put("abc", "audio/mpeg", payload).await?;
//!
//! if store.has("abc") {
//!     let (entry, bytes) = store.get("abc").await?.expect("just stored");
//!     println!("{} is available offline ({} bytes)", entry.guid, bytes.len());
//! }
//!
//! let stats = store.stats();
//! println!("Cache size: {} MB", stats.total_bytes / 1_000_000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use config::{CacheConfig, DownloadConfig};
pub use stats::{CacheStats, CacheUsage, DownloadProgress};
pub use store::{CacheEntry, OfflineCacheStore};
