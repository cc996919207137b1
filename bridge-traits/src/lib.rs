//! # Host Bridge Traits
//!
//! Contracts between the podcast playback core and the host platform.
//!
//! ## Overview
//!
//! The core never touches the network, the disk, or the audio output directly.
//! Each of those is a collaborator the host injects through one of the traits
//! below, which keeps the core testable and lets every platform ship its own
//! adapters.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Buffered and streaming fetch with upstream status and content type
//!
//! ### Storage
//! - [`BlobStore`](storage::BlobStore) - Durable key/blob storage for offline episodes
//! - [`StateStore`](storage::StateStore) - Small whole-state snapshots (position ledger)
//!
//! ### Playback
//! - [`MediaDevice`](playback::MediaDevice) - Platform audio output
//! - [`DeviceSignalSink`](playback::DeviceSignalSink) - Device callbacks back into the core
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map platform errors onto the closest variant so the core can tell a
//! network failure from an upstream status or a timeout.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across tasks
//! behind an `Arc`.

pub mod error;
pub mod http;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, StreamingResponse};
pub use playback::{DeviceSignal, DeviceSignalSink, MediaDevice, MediaSource};
pub use storage::{BlobStore, StateStore};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
