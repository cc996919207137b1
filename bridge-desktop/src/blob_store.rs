//! Blob storage on the local file system using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::BlobStore,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp-";

/// File-per-key blob store.
///
/// Each key maps to one file named by the hex encoding of the key, so any key
/// string is a valid file name. Writes go to a uniquely named temp file in the
/// same directory, are flushed, then renamed over the target; a reader sees
/// either the old file or the complete new one.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform cache directory.
    pub fn default_location() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("podcast-core")
            .join("offline");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn decode_name(name: &str) -> Option<String> {
        if name.contains(TEMP_MARKER) {
            return None;
        }
        let raw = hex::decode(name).ok()?;
        String::from_utf8(raw).ok()
    }

    async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(BridgeError::Io)
    }

    /// Remove temp files left behind by a crash mid-write.
    pub async fn sweep_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(BridgeError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(BridgeError::Io)? {
            let name = entry.file_name();
            if name.to_string_lossy().contains(TEMP_MARKER) {
                if let Err(e) = fs::remove_file(entry.path()).await {
                    warn!(path = ?entry.path(), error = %e, "Failed to remove stale temp file");
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed, root = ?self.root, "Swept stale temp files");
        }
        Ok(removed)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.ensure_root().await?;

        let target = self.path_for(key);
        let temp = self.root.join(format!(
            "{}{}{}",
            hex::encode(key.as_bytes()),
            TEMP_MARKER,
            Uuid::new_v4().simple()
        ));

        let write = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp).await;
            return Err(BridgeError::Io(e));
        }

        debug!(key, size = data.len(), "Wrote blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                debug!(key, "Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(BridgeError::Io)? {
            if let Some(key) = entry.file_name().to_str().and_then(Self::decode_name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        fs::try_exists(self.path_for(key))
            .await
            .map_err(BridgeError::Io)
    }
}
