//! Media device bridge.
//!
//! The host owns the actual audio output (an `<audio>` element, AVPlayer,
//! ExoPlayer, a desktop sink). The core drives it through [`MediaDevice`] and
//! receives device callbacks through [`DeviceSignalSink`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Something a media device can open.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Stream from a network locator.
    Network { url: String },
    /// Play a fully cached payload from memory.
    ///
    /// The payload is reference counted, so removing the cache entry later
    /// does not invalidate a source that was already opened.
    Cached {
        guid: String,
        data: Bytes,
        content_type: String,
    },
}

impl MediaSource {
    pub fn network(url: impl Into<String>) -> Self {
        MediaSource::Network { url: url.into() }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, MediaSource::Cached { .. })
    }

    /// Short human readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Network { url } => format!("network:{}", url),
            MediaSource::Cached { guid, data, .. } => {
                format!("cached:{} ({} bytes)", guid, data.len())
            }
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Network { url } => f.debug_struct("Network").field("url", url).finish(),
            MediaSource::Cached {
                guid,
                data,
                content_type,
            } => f
                .debug_struct("Cached")
                .field("guid", guid)
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
        }
    }
}

/// Callbacks raised by the device while a source is open.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSignal {
    /// Duration became known.
    MetadataLoaded { duration_secs: f64 },
    /// Playback head moved.
    TimeUpdate { position_secs: f64 },
    Playing,
    Paused,
    /// Playback stalled waiting for data.
    Waiting,
    /// Enough data is buffered to continue.
    CanPlay,
    /// A seek completed at the given position.
    Seeked { position_secs: f64 },
    Ended,
    /// The source failed irrecoverably.
    Failed { message: String },
}

/// Receiver for [`DeviceSignal`]s.
///
/// Called from whatever thread the host delivers callbacks on, so it must not
/// block.
pub trait DeviceSignalSink: Send + Sync {
    fn emit(&self, signal: DeviceSignal);
}

/// Platform audio output.
///
/// `open` replaces whatever was open before. Opening a new source resets the
/// device-level playback rate to `1.0`; callers are responsible for
/// re-applying their preferred rate.
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Open `source` positioned at `start_offset_secs` and route its callbacks
    /// to `sink`.
    async fn open(
        &self,
        source: MediaSource,
        start_offset_secs: f64,
        sink: Arc<dyn DeviceSignalSink>,
    ) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn seek(&self, position_secs: f64) -> Result<()>;

    async fn set_volume(&self, volume: f32) -> Result<()>;

    async fn set_rate(&self, rate: f32) -> Result<()>;

    /// Release the current source, if any.
    async fn close(&self) -> Result<()>;
}
