//! # Playback Error Types
//!
//! Error taxonomy shared by the transport, ledger, cache, download and
//! resolver components.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback and offline caching.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Source failed to open or stalled irrecoverably.
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    // ========================================================================
    // Download Errors
    // ========================================================================
    /// Network fetch failed (connection error, upstream status, short body).
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Fetch exceeded its time bound.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A download for this episode is already active.
    #[error("Episode is already downloading: {0}")]
    AlreadyDownloading(String),

    /// The episode is already in the offline cache.
    #[error("Episode is already cached: {0}")]
    AlreadyExists(String),

    /// The download was canceled by the caller.
    #[error("Download canceled: {0}")]
    Canceled(String),

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// No cache entry or active job for this episode.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable storage failed or returned corrupt data.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Committing would exceed the configured cache capacity.
    #[error("Cache full: need {needed} bytes, {available} available")]
    CacheFull { needed: u64, available: u64 },

    /// Metadata or snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::NetworkFailure(_)
                | PlaybackError::Timeout(_)
                | PlaybackError::SourceUnavailable(_)
        )
    }

    /// Returns `true` if the request was refused up front without any state change.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PlaybackError::AlreadyDownloading(_)
                | PlaybackError::AlreadyExists(_)
                | PlaybackError::NotFound(_)
        )
    }

    /// Returns `true` if this error originated in durable storage.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::StorageFailure(_)
                | PlaybackError::CacheFull { .. }
                | PlaybackError::Serialization(_)
        )
    }

    /// Map a bridge error raised by a storage collaborator.
    pub fn storage(err: BridgeError) -> Self {
        PlaybackError::StorageFailure(err.to_string())
    }

    /// Map a bridge error raised by the network collaborator.
    pub fn network(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(after) => PlaybackError::Timeout(after),
            other => PlaybackError::NetworkFailure(other.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
