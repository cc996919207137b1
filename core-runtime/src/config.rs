//! # Core Configuration Module
//!
//! Configuration for the podcast playback core.
//!
//! ## Overview
//!
//! A builder assembles a `CoreConfig` holding the host bridges plus the timing
//! and capacity knobs of the playback engine. `build()` fails fast when a
//! required bridge is missing and no platform default is available.
//!
//! ## Required Dependencies
//!
//! - `MediaDevice` - Platform audio output (no default on any platform)
//!
//! ## Dependencies with desktop defaults
//!
//! With the `desktop-shims` feature these are filled in when not injected:
//!
//! - `HttpClient` - `ReqwestHttpClient` sending the configured user agent
//! - `BlobStore` - `FsBlobStore` under `cache_dir` (or the platform cache dir)
//! - `StateStore` - `SqliteStateStore` at `database_path` (or `cache_dir/state.db`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .database_path("/path/to/state.db")
//!     .media_device(Arc::new(MyAudioOutput::new()))
//!     .max_concurrent_downloads(2)
//!     .download_timeout(Duration::from_secs(600))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No media device: fails with an actionable CapabilityMissing error
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .build()
//!     .expect("Should fail - missing media device");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{BlobStore, HttpClient, MediaDevice, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between position ledger writes while playing.
pub const DEFAULT_LEDGER_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound for opening a network stream and for small fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for a whole media download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Browser-like agent sent upstream unless overridden.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Core configuration for the podcast playback core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory for offline episode blobs, if the default blob store is used
    pub cache_dir: Option<PathBuf>,

    /// SQLite database for small state snapshots, if the default state store is used
    pub database_path: Option<PathBuf>,

    /// Network fetch for episode media
    pub http_client: Arc<dyn HttpClient>,

    /// Durable storage for offline episodes
    pub blob_store: Arc<dyn BlobStore>,

    /// Durable storage for the position ledger snapshot
    pub state_store: Arc<dyn StateStore>,

    /// Platform audio output
    pub media_device: Arc<dyn MediaDevice>,

    /// Cadence of position ledger writes while playing
    pub ledger_interval: Duration,

    /// Bound for opening a download stream
    pub fetch_timeout: Duration,

    /// Bound for a whole download, body included
    pub download_timeout: Duration,

    /// Downloads of different episodes allowed to run at once
    pub max_concurrent_downloads: usize,

    /// Best-effort cap on offline cache size; `None` means unbounded
    pub max_cache_bytes: Option<u64>,

    /// `User-Agent` for upstream requests
    pub user_agent: String,

    /// Per-subscriber event backlog
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("database_path", &self.database_path)
            .field("http_client", &"HttpClient { ... }")
            .field("blob_store", &"BlobStore { ... }")
            .field("state_store", &"StateStore { ... }")
            .field("media_device", &"MediaDevice { ... }")
            .field("ledger_interval", &self.ledger_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("download_timeout", &self.download_timeout)
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("max_cache_bytes", &self.max_cache_bytes)
            .field("user_agent", &self.user_agent)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Called automatically by [`CoreConfigBuilder::build`].
    pub fn validate(&self) -> Result<()> {
        if self.ledger_interval.is_zero() {
            return Err(Error::Config(
                "Ledger interval must be greater than zero".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() || self.download_timeout.is_zero() {
            return Err(Error::Config(
                "Fetch and download timeouts must be greater than zero".to_string(),
            ));
        }

        if self.download_timeout < self.fetch_timeout {
            return Err(Error::Config(format!(
                "Download timeout ({:?}) cannot be shorter than fetch timeout ({:?})",
                self.download_timeout, self.fetch_timeout
            )));
        }

        if self.max_concurrent_downloads == 0 {
            return Err(Error::Config(
                "At least one concurrent download must be allowed".to_string(),
            ));
        }

        if self.max_cache_bytes == Some(0) {
            return Err(Error::Config(
                "Cache capacity of 0 bytes would reject every download; leave it unset for no limit"
                    .to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn media_device_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "MediaDevice".to_string(),
        message: "A MediaDevice implementation is required to play episodes. \
                 Inject the host audio output (AVPlayer, ExoPlayer, a desktop sink) \
                 with .media_device()."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature for the default adapter. \
             Mobile: inject the platform-native adapter.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(user_agent: &str) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_user_agent(user_agent).map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_user_agent: &str) -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing("HttpClient", "downloading episodes"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_blob_store(cache_dir: Option<&PathBuf>) -> Result<Arc<dyn BlobStore>> {
    use bridge_desktop::FsBlobStore;

    let store = match cache_dir {
        Some(dir) => FsBlobStore::new(dir.join("offline")),
        None => FsBlobStore::default_location(),
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_blob_store(_cache_dir: Option<&PathBuf>) -> Result<Arc<dyn BlobStore>> {
    Err(capability_missing("BlobStore", "offline episode storage"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_state_store(
    database_path: Option<&PathBuf>,
    cache_dir: Option<&PathBuf>,
) -> Result<Arc<dyn StateStore>> {
    use bridge_desktop::SqliteStateStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let path = database_path
        .cloned()
        .or_else(|| cache_dir.map(|dir| dir.join("state.db")))
        .ok_or_else(|| {
            Error::Config(
                "A database path or cache directory is required for the default StateStore. \
                 Use .database_path() or inject a StateStore."
                    .to_string(),
            )
        })?;

    // The store constructor is async; build it on a private runtime so this
    // works both inside and outside an existing Tokio context.
    let init_store = |path: PathBuf| -> Result<SqliteStateStore> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default state store: {}",
                    e
                ))
            })?;

        runtime.block_on(SqliteStateStore::new(path)).map_err(|e| {
            Error::Internal(format!("Failed to initialize default StateStore: {}", e))
        })
    };

    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default StateStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_state_store(
    _database_path: Option<&PathBuf>,
    _cache_dir: Option<&PathBuf>,
) -> Result<Arc<dyn StateStore>> {
    Err(capability_missing("StateStore", "persisting playback positions"))
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    state_store: Option<Arc<dyn StateStore>>,
    media_device: Option<Arc<dyn MediaDevice>>,
    ledger_interval: Option<Duration>,
    fetch_timeout: Option<Duration>,
    download_timeout: Option<Duration>,
    max_concurrent_downloads: Option<usize>,
    max_cache_bytes: Option<u64>,
    user_agent: Option<String>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn media_device(mut self, device: Arc<dyn MediaDevice>) -> Self {
        self.media_device = Some(device);
        self
    }

    pub fn ledger_interval(mut self, interval: Duration) -> Self {
        self.ledger_interval = Some(interval);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = Some(count);
        self
    }

    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = Some(bytes);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        let media_device = self.media_device.ok_or_else(media_device_missing_error)?;
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&user_agent)?,
        };

        let blob_store = match self.blob_store {
            Some(store) => store,
            None => provide_default_blob_store(self.cache_dir.as_ref())?,
        };

        let state_store = match self.state_store {
            Some(store) => store,
            None => {
                provide_default_state_store(self.database_path.as_ref(), self.cache_dir.as_ref())?
            }
        };

        let config = CoreConfig {
            cache_dir: self.cache_dir,
            database_path: self.database_path,
            http_client,
            blob_store,
            state_store,
            media_device,
            ledger_interval: self.ledger_interval.unwrap_or(DEFAULT_LEDGER_INTERVAL),
            fetch_timeout: self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            download_timeout: self.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            max_concurrent_downloads: self
                .max_concurrent_downloads
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            max_cache_bytes: self.max_cache_bytes,
            user_agent,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
