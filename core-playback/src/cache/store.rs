//! Offline cache store
//!
//! Entries are kept in the host [`BlobStore`] as two records:
//! `meta/{guid}` holds a JSON [`CacheRecord`] and `payload/{guid}/{uuid}`
//! holds the bytes. A put stages the payload under a fresh key, publishes
//! the metadata record only after the payload write returned, and then
//! updates the in-memory index. Readers go through the index, so an entry
//! is visible only once both records are durable.

use bridge_traits::{BlobStore, Clock, SystemClock};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::stats::{CacheStats, CacheUsage};
use crate::error::{PlaybackError, Result};
use crate::types::EpisodeDescriptor;

const META_PREFIX: &str = "meta/";
const PAYLOAD_PREFIX: &str = "payload/";

/// Public metadata of a committed offline episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub guid: String,
    pub byte_length: u64,
    /// Declared media type, `application/octet-stream` when unknown.
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    /// Descriptor the episode was downloaded from, so the offline list can
    /// be shown without the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeDescriptor>,
}

/// What is persisted under `meta/{guid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    #[serde(flatten)]
    entry: CacheEntry,
    sha256: String,
    payload_key: String,
}

/// Durable store of fully downloaded episodes.
pub struct OfflineCacheStore {
    blobs: Arc<dyn BlobStore>,
    config: CacheConfig,
    events: Option<EventBus>,
    clock: Arc<dyn Clock>,

    /// Published records. Authoritative for `has` and `list_metadata`.
    index: RwLock<HashMap<String, CacheRecord>>,

    /// Per-guid writer locks
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,

    hits: AtomicU64,
    misses: AtomicU64,
    corrupt_reads: AtomicU64,
}

impl OfflineCacheStore {
    /// Create a store over `blobs`. Call [`initialize`](Self::initialize)
    /// to pick up entries committed by an earlier process.
    pub fn new(blobs: Arc<dyn BlobStore>, config: CacheConfig) -> Self {
        Self {
            blobs,
            config,
            events: None,
            clock: Arc::new(SystemClock),
            index: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corrupt_reads: AtomicU64::new(0),
        }
    }

    /// Publish [`CacheEvent`]s on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Stamp `created_at` from `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Load the index from durable storage and drop orphaned payloads.
    ///
    /// Returns the number of entries found. Unreadable metadata records are
    /// skipped with a warning.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<usize> {
        info!("Initializing offline cache store");

        self.config
            .validate()
            .map_err(|e| PlaybackError::Internal(format!("Invalid cache config: {}", e)))?;

        let keys = self
            .blobs
            .list_keys(META_PREFIX)
            .await
            .map_err(PlaybackError::storage)?;

        let mut loaded = HashMap::new();
        for key in keys {
            let raw = match self.blobs.get(&key).await.map_err(PlaybackError::storage)? {
                Some(raw) => raw,
                None => continue,
            };
            match serde_json::from_slice::<CacheRecord>(&raw) {
                Ok(record) => {
                    loaded.insert(record.entry.guid.clone(), record);
                }
                Err(e) => warn!("Skipping unreadable cache record {}: {}", key, e),
            }
        }

        let referenced: HashSet<String> =
            loaded.values().map(|r| r.payload_key.clone()).collect();
        let count = loaded.len();
        *self.index.write() = loaded;

        let removed = self.remove_orphans(&referenced).await;
        info!(
            "Offline cache ready: {} entries, {} orphaned payloads removed",
            count, removed
        );
        Ok(count)
    }

    /// Payloads staged by a put that never published, e.g. after a crash.
    async fn remove_orphans(&self, referenced: &HashSet<String>) -> usize {
        let keys = match self.blobs.list_keys(PAYLOAD_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list payloads for cleanup: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.into_iter().filter(|k| !referenced.contains(k)) {
            match self.blobs.delete(&key).await {
                Ok(_) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned payload {}: {}", key, e),
            }
        }
        removed
    }

    /// Returns true if a complete entry for `guid` is committed.
    pub fn has(&self, guid: &str) -> bool {
        self.index.read().contains_key(guid)
    }

    /// Metadata of one entry without reading its payload.
    pub fn metadata(&self, guid: &str) -> Option<CacheEntry> {
        self.index.read().get(guid).map(|r| r.entry.clone())
    }

    /// Metadata of every entry, oldest first. Payloads are not read.
    pub fn list_metadata(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .index
            .read()
            .values()
            .map(|r| r.entry.clone())
            .collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.guid.cmp(&b.guid))
        });
        entries
    }

    /// Store `payload` for `guid`, replacing any previous entry.
    pub async fn put(&self, guid: &str, content_type: &str, payload: Bytes) -> Result<CacheEntry> {
        let _guard = self.lock_guid(guid).await;
        self.put_locked(guid, None, content_type, payload).await
    }

    /// Store `payload` for `episode`, keeping the descriptor with the entry.
    pub async fn put_episode(
        &self,
        episode: &EpisodeDescriptor,
        content_type: &str,
        payload: Bytes,
    ) -> Result<CacheEntry> {
        let _guard = self.lock_guid(&episode.guid).await;
        self.put_locked(&episode.guid, Some(episode), content_type, payload)
            .await
    }

    /// Like [`put_episode`](Self::put_episode), but gives up with
    /// [`PlaybackError::Canceled`] if `token` is canceled by the time this
    /// writer holds the guid lock.
    ///
    /// A download canceled while waiting behind a concurrent `delete` can
    /// therefore never resurrect the deleted entry.
    pub async fn put_unless_canceled(
        &self,
        episode: &EpisodeDescriptor,
        content_type: &str,
        payload: Bytes,
        token: &CancellationToken,
    ) -> Result<CacheEntry> {
        let guid = episode.guid.as_str();
        let _guard = self.lock_guid(guid).await;
        if token.is_cancelled() {
            debug!("Skipping commit for {}: canceled", guid);
            return Err(PlaybackError::Canceled(guid.to_string()));
        }
        self.put_locked(guid, Some(episode), content_type, payload)
            .await
    }

    #[instrument(skip(self, payload), fields(size = payload.len()))]
    async fn put_locked(
        &self,
        guid: &str,
        episode: Option<&EpisodeDescriptor>,
        content_type: &str,
        payload: Bytes,
    ) -> Result<CacheEntry> {
        let size = payload.len() as u64;
        self.check_capacity(guid, size)?;

        let payload_key = format!("{}{}/{}", PAYLOAD_PREFIX, guid, Uuid::new_v4().simple());
        let record = CacheRecord {
            entry: CacheEntry {
                guid: guid.to_string(),
                byte_length: size,
                content_type: content_type.to_string(),
                created_at: self.clock.now(),
                episode: episode.cloned(),
            },
            sha256: calculate_hash(&payload),
            payload_key: payload_key.clone(),
        };
        let encoded = Bytes::from(serde_json::to_vec(&record)?);

        debug!("Staging payload for {} at {}", guid, payload_key);
        self.blobs
            .put(&payload_key, payload)
            .await
            .map_err(PlaybackError::storage)?;

        if let Err(e) = self.blobs.put(&meta_key(guid), encoded).await {
            warn!("Failed to publish cache record for {}: {}", guid, e);
            if let Err(cleanup) = self.blobs.delete(&payload_key).await {
                warn!("Failed to remove staged payload {}: {}", payload_key, cleanup);
            }
            return Err(PlaybackError::storage(e));
        }

        let previous = self.index.write().insert(guid.to_string(), record.clone());
        if let Some(previous) = previous {
            if let Err(e) = self.blobs.delete(&previous.payload_key).await {
                warn!("Failed to remove superseded payload {}: {}", previous.payload_key, e);
            }
        }

        info!("Episode {} cached ({} bytes, {})", guid, size, content_type);
        self.emit(CacheEvent::EntryStored {
            guid: guid.to_string(),
            byte_length: size,
        });
        Ok(record.entry)
    }

    fn check_capacity(&self, guid: &str, size: u64) -> Result<()> {
        let Some(max) = self.config.max_cache_bytes else {
            return Ok(());
        };

        let used: u64 = self
            .index
            .read()
            .values()
            .filter(|r| r.entry.guid != guid)
            .map(|r| r.entry.byte_length)
            .sum();
        let available = max.saturating_sub(used);

        if size > available {
            warn!("Cache full: {} needs {} bytes, {} available", guid, size, available);
            return Err(PlaybackError::CacheFull {
                needed: size,
                available,
            });
        }
        Ok(())
    }

    /// Read an entry and its payload.
    ///
    /// Returns `Ok(None)` when nothing is committed for `guid`. A missing or
    /// corrupt payload behind a published record is a `StorageFailure`.
    #[instrument(skip(self))]
    pub async fn get(&self, guid: &str) -> Result<Option<(CacheEntry, Bytes)>> {
        let _guard = self.lock_guid(guid).await;

        let Some(record) = self.index.read().get(guid).cloned() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let payload = self
            .blobs
            .get(&record.payload_key)
            .await
            .map_err(PlaybackError::storage)?
            .ok_or_else(|| {
                PlaybackError::StorageFailure(format!("Payload missing for {}", guid))
            })?;

        if payload.len() as u64 != record.entry.byte_length {
            self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
            return Err(PlaybackError::StorageFailure(format!(
                "Payload length mismatch for {}: expected {}, found {}",
                guid,
                record.entry.byte_length,
                payload.len()
            )));
        }

        if self.config.verify_integrity && calculate_hash(&payload) != record.sha256 {
            self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
            warn!("Integrity check failed for cached episode {}", guid);
            return Err(PlaybackError::StorageFailure(format!(
                "Integrity check failed for {}",
                guid
            )));
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some((record.entry, payload)))
    }

    /// Remove an entry. `NotFound` when nothing is committed for `guid`.
    ///
    /// Payload bytes already handed out stay valid.
    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> Result<CacheEntry> {
        let _guard = self.lock_guid(guid).await;
        self.delete_locked(guid).await
    }

    async fn delete_locked(&self, guid: &str) -> Result<CacheEntry> {
        let record = self
            .index
            .read()
            .get(guid)
            .cloned()
            .ok_or_else(|| PlaybackError::NotFound(guid.to_string()))?;

        self.blobs
            .delete(&meta_key(guid))
            .await
            .map_err(PlaybackError::storage)?;
        self.index.write().remove(guid);

        if let Err(e) = self.blobs.delete(&record.payload_key).await {
            // Unreferenced now; the next initialize() sweeps it.
            warn!("Failed to remove payload {}: {}", record.payload_key, e);
        }

        info!("Removed cached episode {}", guid);
        self.emit(CacheEvent::EntryDeleted {
            guid: guid.to_string(),
        });
        Ok(record.entry)
    }

    /// Remove every entry. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        let guids: Vec<String> = self.index.read().keys().cloned().collect();

        let mut removed = 0;
        for guid in guids {
            let _guard = self.lock_guid(&guid).await;
            match self.delete_locked(&guid).await {
                Ok(_) => removed += 1,
                Err(PlaybackError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!("Cleared offline cache ({} entries)", removed);
        self.emit(CacheEvent::Cleared {
            entries_removed: removed,
        });
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.read();
        CacheStats {
            entries: index.len(),
            total_bytes: index.values().map(|r| r.entry.byte_length).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            calculated_at: self.clock.unix_timestamp(),
        }
    }

    /// Current stats measured against the configured capacity.
    pub fn usage(&self) -> CacheUsage {
        self.stats().usage(self.config.max_cache_bytes)
    }

    async fn lock_guid(&self, guid: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(guid.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Cache(event));
        }
    }
}

fn meta_key(guid: &str) -> String {
    format!("{}{}", META_PREFIX, guid)
}

fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemoryBlobStore;

    fn store() -> (Arc<MemoryBlobStore>, OfflineCacheStore) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = OfflineCacheStore::new(blobs.clone(), CacheConfig::default());
        (blobs, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_, store) = store();
        assert!(!store.has("abc"));
        assert!(store.get("abc").await.unwrap().is_none());

        let entry = store
            .put("abc", "audio/mpeg", Bytes::from_static(b"episode"))
            .await
            .unwrap();
        assert_eq!(entry.byte_length, 7);
        assert!(store.has("abc"));

        let (meta, payload) = store.get("abc").await.unwrap().unwrap();
        assert_eq!(meta.content_type, "audio/mpeg");
        assert_eq!(payload, Bytes::from_static(b"episode"));

        store.delete("abc").await.unwrap();
        assert!(!store.has("abc"));
        assert!(matches!(
            store.delete("abc").await,
            Err(PlaybackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_stamped_by_clock() {
        let instant = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let store = OfflineCacheStore::new(Arc::new(MemoryBlobStore::new()), CacheConfig::default())
            .with_clock(Arc::new(bridge_traits::FixedClock(instant)));

        let entry = store.put("abc", "audio/mpeg", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(entry.created_at, instant);
        assert_eq!(store.metadata("abc").unwrap().created_at, instant);
        assert_eq!(store.stats().calculated_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_replace_removes_old_payload() {
        let (blobs, store) = store();
        store.put("abc", "audio/mpeg", Bytes::from_static(b"one")).await.unwrap();
        store.put("abc", "audio/mpeg", Bytes::from_static(b"two")).await.unwrap();

        let payloads = blobs.list_keys(PAYLOAD_PREFIX).await.unwrap();
        assert_eq!(payloads.len(), 1);

        let (_, payload) = store.get("abc").await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_initialize_restores_index_and_sweeps_orphans() {
        let (blobs, store) = store();
        store.put("abc", "audio/mpeg", Bytes::from_static(b"kept")).await.unwrap();
        blobs
            .put("payload/lost/deadbeef", Bytes::from_static(b"partial"))
            .await
            .unwrap();

        let reopened = OfflineCacheStore::new(blobs.clone(), CacheConfig::default());
        assert_eq!(reopened.initialize().await.unwrap(), 1);
        assert!(reopened.has("abc"));
        assert!(!blobs.contains("payload/lost/deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_storage_failure() {
        let (blobs, store) = store();
        store.put("abc", "audio/mpeg", Bytes::from_static(b"good")).await.unwrap();

        let key = blobs.list_keys(PAYLOAD_PREFIX).await.unwrap().remove(0);
        blobs.put(&key, Bytes::from_static(b"evil")).await.unwrap();

        assert!(matches!(
            store.get("abc").await,
            Err(PlaybackError::StorageFailure(_))
        ));
        assert_eq!(store.stats().corrupt_reads, 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = OfflineCacheStore::new(blobs, CacheConfig::new().with_max_size(10));

        store.put("a", "audio/mpeg", Bytes::from(vec![0u8; 6])).await.unwrap();
        let err = store
            .put("b", "audio/mpeg", Bytes::from(vec![0u8; 6]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlaybackError::CacheFull {
                needed: 6,
                available: 4
            }
        ));
        assert!(!store.has("b"));

        // Replacing an entry does not count its old size twice.
        store.put("a", "audio/mpeg", Bytes::from(vec![0u8; 10])).await.unwrap();
    }

    #[tokio::test]
    async fn test_canceled_put_is_skipped() {
        let (_, store) = store();
        let token = CancellationToken::new();
        token.cancel();

        let result = store
            .put_unless_canceled(
                &EpisodeDescriptor::new("abc", "http://x/a.mp3"),
                "audio/mpeg",
                Bytes::from_static(b"x"),
                &token,
            )
            .await;
        assert!(matches!(result, Err(PlaybackError::Canceled(_))));
        assert!(!store.has("abc"));
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (_, store) = store();
        store.put("a", "audio/mpeg", Bytes::from(vec![0u8; 4])).await.unwrap();
        store.put("b", "audio/mpeg", Bytes::from(vec![0u8; 6])).await.unwrap();
        store.get("a").await.unwrap();
        store.get("missing").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_bytes, 10);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list_metadata().is_empty());
    }

    #[test]
    fn test_calculate_hash() {
        assert_eq!(
            calculate_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
