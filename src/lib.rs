//! Workspace umbrella crate.
//!
//! Re-exports the podcast playback core so host applications can depend on
//! `podcast-core-workspace` alone. The `desktop-shims` feature (default) pulls
//! in the desktop bridge implementations for HTTP, blob storage and state
//! storage.

pub use core_playback as playback;
pub use core_service::{PodcastCore, ServiceError};
