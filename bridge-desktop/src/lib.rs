//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with chunked body streaming
//! - `BlobStore` using `tokio::fs` with temp-file-and-rename writes
//! - `StateStore` using a SQLite key/value table
//! - In-memory `BlobStore` / `StateStore` for tests and ephemeral sessions
//!
//! There is no desktop `MediaDevice`; hosts plug in their audio output.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FsBlobStore, ReqwestHttpClient, SqliteStateStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let blobs = FsBlobStore::default_location();
//!     let state = SqliteStateStore::new("state.db".into()).await?;
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod blob_store;
mod http;
mod memory;
mod state_store;

pub use blob_store::FsBlobStore;
pub use http::{ReqwestHttpClient, DEFAULT_USER_AGENT};
pub use memory::{MemoryBlobStore, MemoryStateStore};
pub use state_store::SqliteStateStore;
