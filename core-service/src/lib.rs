//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges held by a
//! [`CoreConfig`](core_runtime::config::CoreConfig) (HTTP, blob storage,
//! state storage, audio output) into the playback components of
//! `core-playback` and hands the host a single [`PodcastCore`] to drive.
//! Desktop apps typically keep the `desktop-shims` feature on, which lets the
//! config fill in the `bridge-desktop` adapters.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::PodcastCore;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .media_device(Arc::new(MyAudioOutput::new()))
//!     .build()?;
//! let core = PodcastCore::bootstrap(config).await?;
//!
//! core.download(&episode)?.wait().await?;
//! core.play_episode(episode).await;
//! ```

pub mod error;

pub use error::{Result, ServiceError};

use std::sync::Arc;

use core_playback::{
    CacheConfig, CacheEntry, CacheStats, CacheUsage, DownloadConfig, DownloadCoordinator, DownloadHandle,
    DownloadProgress, EpisodeDescriptor, OfflineCacheStore, PlaybackError, PlaybackRate,
    PlaybackSession, PositionLedger, SourceId, SourceResolver, TransportEngine, TransportState,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use tracing::{info, instrument, warn};

/// Primary façade exposed to host applications.
///
/// Owns one event bus, one offline cache, one position ledger, one transport
/// and the session tying them together. Must be created and used inside a
/// Tokio runtime.
pub struct PodcastCore {
    config: CoreConfig,
    events: EventBus,
    cache: Arc<OfflineCacheStore>,
    downloads: DownloadCoordinator,
    session: PlaybackSession,
}

impl PodcastCore {
    /// Build every component from `config`, load the offline index and
    /// restore saved playback positions.
    ///
    /// A corrupt position snapshot is logged and ignored so playback still
    /// starts; a cache that cannot be indexed fails initialization.
    #[instrument(skip(config))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);

        let mut cache_config = CacheConfig::new();
        if let Some(max) = config.max_cache_bytes {
            cache_config = cache_config.with_max_size(max);
        }
        cache_config
            .validate()
            .map_err(ServiceError::InitializationFailed)?;

        let cache = Arc::new(
            OfflineCacheStore::new(Arc::clone(&config.blob_store), cache_config)
                .with_events(events.clone()),
        );
        let cached = cache.initialize().await.map_err(|e| {
            ServiceError::InitializationFailed(format!("Offline cache unavailable: {}", e))
        })?;

        let ledger = Arc::new(PositionLedger::new(
            Arc::clone(&config.state_store),
            config.ledger_interval,
        ));
        let restored = match ledger.load().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable playback positions");
                0
            }
        };

        let download_config = DownloadConfig::new()
            .with_fetch_timeout(config.fetch_timeout)
            .with_download_timeout(config.download_timeout)
            .with_max_concurrent_downloads(config.max_concurrent_downloads)
            .with_user_agent(config.user_agent.clone());
        download_config
            .validate()
            .map_err(ServiceError::InitializationFailed)?;

        let downloads = DownloadCoordinator::new(
            Arc::clone(&config.http_client),
            Arc::clone(&cache),
            download_config,
            events.clone(),
        );

        let transport = TransportEngine::new(Arc::clone(&config.media_device), events.clone());
        let resolver = SourceResolver::new(Arc::clone(&cache));
        let session = PlaybackSession::new(transport, ledger, resolver);

        info!(
            cached_episodes = cached,
            saved_positions = restored,
            "Podcast core ready"
        );

        Ok(Self {
            config,
            events,
            cache,
            downloads,
            session,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// New subscription to every core event from this point on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    pub fn cache(&self) -> &Arc<OfflineCacheStore> {
        &self.cache
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn transport(&self) -> &TransportEngine {
        self.session.transport()
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        self.session.ledger()
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Resolve, load and start `episode` at its saved position.
    pub async fn play_episode(&self, episode: EpisodeDescriptor) -> SourceId {
        self.session.play_episode(episode).await
    }

    pub async fn play_next(&self, queue: &[EpisodeDescriptor]) -> Option<SourceId> {
        self.session.play_next(queue).await
    }

    pub async fn play_previous(&self, queue: &[EpisodeDescriptor]) -> Option<SourceId> {
        self.session.play_previous(queue).await
    }

    pub fn current_episode(&self) -> Option<EpisodeDescriptor> {
        self.session.current_episode()
    }

    pub async fn resume(&self) {
        self.transport().play().await;
    }

    pub async fn pause(&self) {
        self.transport().pause().await;
    }

    pub async fn toggle_play(&self) {
        self.transport().toggle_play().await;
    }

    pub async fn seek(&self, position_secs: f64) -> f64 {
        self.transport().seek(position_secs).await
    }

    pub async fn skip(&self, delta_secs: f64) -> f64 {
        self.transport().skip(delta_secs).await
    }

    pub async fn set_volume(&self, volume: f32) -> f32 {
        self.transport().set_volume(volume).await
    }

    pub async fn set_rate(&self, rate: f32) -> PlaybackRate {
        self.transport().set_rate(rate).await
    }

    /// Save the current position and release the source.
    pub async fn stop(&self) {
        self.session.stop().await;
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport().state()
    }

    /// Saved resume offset for `guid`, `0.0` when never played.
    pub fn resume_position(&self, guid: &str) -> f64 {
        self.ledger().recall(guid)
    }

    // ------------------------------------------------------------------
    // Offline downloads
    // ------------------------------------------------------------------

    /// Pin `episode` for offline playback.
    pub fn download(&self, episode: &EpisodeDescriptor) -> Result<DownloadHandle> {
        Ok(self.downloads.start(episode)?)
    }

    pub fn cancel_download(&self, guid: &str) -> Result<()> {
        Ok(self.downloads.cancel(guid)?)
    }

    pub fn download_progress(&self, guid: &str) -> Option<DownloadProgress> {
        self.downloads.progress(guid)
    }

    pub fn is_downloaded(&self, guid: &str) -> bool {
        self.cache.has(guid)
    }

    /// Cached episodes, oldest first.
    pub fn downloaded_episodes(&self) -> Vec<CacheEntry> {
        self.cache.list_metadata()
    }

    /// Unpin `guid`: cancel its download if one is running and delete the
    /// offline copy if one exists.
    ///
    /// Fails with `NotFound` only when there was neither.
    #[instrument(skip(self))]
    pub async fn remove_download(&self, guid: &str) -> Result<Option<CacheEntry>> {
        let canceled = self.downloads.cancel(guid).is_ok();

        match self.cache.delete(guid).await {
            Ok(entry) => Ok(Some(entry)),
            Err(PlaybackError::NotFound(_)) if canceled => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Space used by offline copies against `max_cache_bytes`.
    pub fn cache_usage(&self) -> CacheUsage {
        self.cache.usage()
    }

    /// Cancel every download and stop playback, saving the position.
    pub async fn shutdown(&self) {
        let canceled = self.downloads.cancel_all();
        self.session.stop().await;
        info!(canceled_downloads = canceled, "Podcast core shut down");
    }
}
