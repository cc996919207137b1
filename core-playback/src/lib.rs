//! # Playback & Offline Cache Module
//!
//! Playback transport, resume positions and offline episode storage.
//!
//! ## Overview
//!
//! This crate handles:
//! - Driving one platform media device through [`TransportEngine`]
//! - Remembering where each episode was left off ([`PositionLedger`])
//! - Storing fully downloaded episodes ([`OfflineCacheStore`])
//! - Chunked downloads with progress reporting ([`DownloadCoordinator`])
//! - Picking cached bytes over the network at play time ([`SourceResolver`])
//! - Tying the above together for one listener ([`PlaybackSession`])
//!
//! ## Control flow
//!
//! ```text
//! select episode ─▶ SourceResolver ──has/get──▶ OfflineCacheStore
//!                        │
//!                        ▼
//!              PositionLedger::recall ─▶ TransportEngine::load ─▶ MediaDevice
//!                                              │
//!                                  TransportEvent (EventBus)
//!                                              │
//!                                              ▼
//!                                 PositionLedger cadence writes
//!
//! download request ─▶ DownloadCoordinator ─▶ HttpClient::stream
//!                          │ chunks, progress
//!                          ▼
//!                   OfflineCacheStore::put
//! ```

pub mod cache;
pub mod download;
pub mod error;
pub mod ledger;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod types;

pub use cache::{
    CacheConfig, CacheEntry, CacheStats, CacheUsage, DownloadConfig, DownloadProgress,
    OfflineCacheStore,
};
pub use download::{DownloadCoordinator, DownloadHandle, JobState};
pub use error::{PlaybackError, Result};
pub use ledger::PositionLedger;
pub use resolver::SourceResolver;
pub use session::PlaybackSession;
pub use transport::{PlaybackRate, SourceId, TransportEngine, TransportState, TransportStatus};
pub use types::{format_time, parse_duration, EpisodeDescriptor, PlaybackTarget};
