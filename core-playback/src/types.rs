//! Episode and playback target types.

use bridge_traits::MediaSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One episode as produced by the feed parser.
///
/// `guid` is the join key for positions, offline copies and the current
/// session. It never changes once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeDescriptor {
    pub guid: String,
    pub title: String,
    pub podcast_title: String,
    pub podcast_image: Option<String>,
    /// Remote media URL.
    pub network_locator: String,
    pub duration_hint_secs: Option<f64>,
    pub published_at: Option<DateTime<Utc>>,
}

impl EpisodeDescriptor {
    pub fn new(guid: impl Into<String>, network_locator: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: String::new(),
            podcast_title: String::new(),
            podcast_image: None,
            network_locator: network_locator.into(),
            duration_hint_secs: None,
            published_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_podcast(mut self, title: impl Into<String>, image: Option<String>) -> Self {
        self.podcast_title = title.into();
        self.podcast_image = image;
        self
    }

    pub fn with_duration_hint(mut self, secs: f64) -> Self {
        self.duration_hint_secs = Some(secs);
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    /// Identity for an item whose feed carries no `<guid>`.
    ///
    /// Derived from the feed URL and the item's position in the feed, so
    /// parsing the same feed twice yields the same identities.
    pub fn synthetic_guid(feed_url: &str, index: usize) -> String {
        format!("{}-{}", feed_url, index)
    }
}

/// What the transport needs to start playing an episode.
///
/// Built by the resolver at play time and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackTarget {
    pub guid: String,
    pub title: String,
    pub podcast_title: String,
    pub artwork_ref: Option<String>,
    pub network_locator: String,
    pub duration_hint: Option<f64>,
    pub source: MediaSource,
}

impl PlaybackTarget {
    pub fn new(episode: &EpisodeDescriptor, source: MediaSource) -> Self {
        Self {
            guid: episode.guid.clone(),
            title: episode.title.clone(),
            podcast_title: episode.podcast_title.clone(),
            artwork_ref: episode.podcast_image.clone(),
            network_locator: episode.network_locator.clone(),
            duration_hint: episode.duration_hint_secs,
            source,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.source.is_cached()
    }
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up.
///
/// Non-finite and non-positive input renders as `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }

    let total = seconds.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Parse an `itunes:duration` value: `HH:MM:SS`, `MM:SS`, or plain seconds.
pub fn parse_duration(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let parts = value
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [secs] => Some(*secs),
        [minutes, secs] => Some(minutes * 60 + secs),
        [hours, minutes, secs] => Some(hours * 3600 + minutes * 60 + secs),
        _ => None,
    }
}
