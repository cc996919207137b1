//! Playback source resolution.
//!
//! At play time an episode is bound either to its cached payload or to its
//! network locator. Any cache problem degrades to streaming.

use bridge_traits::MediaSource;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cache::OfflineCacheStore;
use crate::types::{EpisodeDescriptor, PlaybackTarget};

/// Chooses between the offline copy and the network for an episode.
#[derive(Clone)]
pub struct SourceResolver {
    cache: Arc<OfflineCacheStore>,
}

impl SourceResolver {
    pub fn new(cache: Arc<OfflineCacheStore>) -> Self {
        Self { cache }
    }

    /// Build the playback target for `episode`. Never fails.
    #[instrument(skip(self, episode), fields(guid = %episode.guid))]
    pub async fn resolve(&self, episode: &EpisodeDescriptor) -> PlaybackTarget {
        let network = || MediaSource::network(episode.network_locator.clone());

        if !self.cache.has(&episode.guid) {
            debug!("Not cached, streaming from network");
            return PlaybackTarget::new(episode, network());
        }

        match self.cache.get(&episode.guid).await {
            Ok(Some((entry, data))) => {
                debug!(bytes = data.len(), "Playing offline copy");
                PlaybackTarget::new(
                    episode,
                    MediaSource::Cached {
                        guid: entry.guid,
                        data,
                        content_type: entry.content_type,
                    },
                )
            }
            Ok(None) => {
                debug!("Entry removed before read, streaming from network");
                PlaybackTarget::new(episode, network())
            }
            Err(e) => {
                warn!("Offline copy unreadable, falling back to network: {}", e);
                PlaybackTarget::new(episode, network())
            }
        }
    }
}
