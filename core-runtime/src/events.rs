//! # Event Bus System
//!
//! Typed notification channel for the podcast playback core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: `CoreEvent` wrapping transport, download, and cache events
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐
//! │ Transport Engine ├────────>│           │
//! └──────────────────┘         │           │   subscribe   ┌──────────────────┐
//!                              │ EventBus  ├──────────────>│ Playback session │
//! ┌──────────────────┐  emit   │ (broadcast│               └──────────────────┘
//! │ Download Coord.  ├────────>│  channel) │   subscribe   ┌──────────────────┐
//! └──────────────────┘         │           ├──────────────>│ Host UI          │
//! ┌──────────────────┐  emit   │           │               └──────────────────┘
//! │ Offline Cache    ├────────>│           │
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, TransportEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Transport(TransportEvent::Started { source_id: 1 }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback started");
//! # }
//! ```
//!
//! ## Ordering
//!
//! A broadcast channel delivers events to each subscriber in emission order.
//! Transport events carry the `source_id` of the load they belong to; the
//! engine never emits an event for a source after a newer load has started.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Position updates arrive several times a second while playing, so the
/// buffer is sized for a few seconds of backlog.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Playback transport events
    Transport(TransportEvent),
    /// Offline download events
    Download(DownloadEvent),
    /// Offline cache mutations
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Transport(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Transport(TransportEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Transport(TransportEvent::SeekCorrected { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Canceled { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Committed { .. }) => EventSeverity::Info,
            CoreEvent::Cache(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Transport Events
// ============================================================================

/// Events published by the transport engine.
///
/// `source_id` identifies the `load()` call the event belongs to. Positions
/// and durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransportEvent {
    /// A new source is being opened.
    Loading {
        source_id: u64,
        /// Short label of the source (`network:<url>` or `cached:<guid>`).
        source: String,
        start_position_ms: u64,
    },
    /// The source reported its duration.
    DurationKnown { source_id: u64, duration_ms: u64 },
    /// Playback position changed (progression or seek).
    PositionChanged {
        source_id: u64,
        position_ms: u64,
        duration_ms: Option<u64>,
    },
    /// A seek landed somewhere other than requested.
    SeekCorrected {
        source_id: u64,
        requested_ms: u64,
        actual_ms: u64,
    },
    /// Playback started or resumed.
    Started { source_id: u64 },
    /// Playback paused.
    Paused { source_id: u64, position_ms: u64 },
    /// The source played to the end. Position has been reset to zero.
    Ended { source_id: u64 },
    /// Playback stalled waiting for data.
    BufferingStarted { source_id: u64 },
    /// Enough data arrived to continue.
    BufferingEnded { source_id: u64 },
    /// The transport was stopped and the source released.
    Stopped { source_id: u64 },
    /// Playback error occurred.
    Error {
        /// The source if one was bound.
        source_id: Option<u64>,
        /// Human-readable error message.
        message: String,
        /// Whether re-issuing `load` may succeed.
        recoverable: bool,
    },
}

impl TransportEvent {
    fn description(&self) -> &str {
        match self {
            TransportEvent::Loading { .. } => "Loading source",
            TransportEvent::DurationKnown { .. } => "Duration known",
            TransportEvent::PositionChanged { .. } => "Playback position changed",
            TransportEvent::SeekCorrected { .. } => "Seek corrected by device",
            TransportEvent::Started { .. } => "Playback started",
            TransportEvent::Paused { .. } => "Playback paused",
            TransportEvent::Ended { .. } => "Playback ended",
            TransportEvent::BufferingStarted { .. } => "Buffering started",
            TransportEvent::BufferingEnded { .. } => "Buffering ended",
            TransportEvent::Stopped { .. } => "Playback stopped",
            TransportEvent::Error { .. } => "Playback error",
        }
    }

    /// The load this event belongs to, if any.
    pub fn source_id(&self) -> Option<u64> {
        match self {
            TransportEvent::Loading { source_id, .. }
            | TransportEvent::DurationKnown { source_id, .. }
            | TransportEvent::PositionChanged { source_id, .. }
            | TransportEvent::SeekCorrected { source_id, .. }
            | TransportEvent::Started { source_id }
            | TransportEvent::Paused { source_id, .. }
            | TransportEvent::Ended { source_id }
            | TransportEvent::BufferingStarted { source_id }
            | TransportEvent::BufferingEnded { source_id }
            | TransportEvent::Stopped { source_id } => Some(*source_id),
            TransportEvent::Error { source_id, .. } => *source_id,
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Events related to offline downloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Download job accepted and the upstream answered.
    Started {
        guid: String,
        /// Declared body length, if any.
        total_bytes: Option<u64>,
    },
    /// A chunk arrived.
    Progress {
        guid: String,
        received_bytes: u64,
        total_bytes: Option<u64>,
        /// `None` when the upstream declared no length.
        percent: Option<u8>,
    },
    /// Payload committed to the offline cache.
    Committed { guid: String, byte_length: u64 },
    /// Download failed; nothing was committed.
    Failed {
        guid: String,
        message: String,
        /// Whether retrying later may succeed.
        retryable: bool,
    },
    /// Download canceled by the caller; nothing was committed.
    Canceled { guid: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download progress",
            DownloadEvent::Committed { .. } => "Download committed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Canceled { .. } => "Download canceled",
        }
    }

    pub fn guid(&self) -> &str {
        match self {
            DownloadEvent::Started { guid, .. }
            | DownloadEvent::Progress { guid, .. }
            | DownloadEvent::Committed { guid, .. }
            | DownloadEvent::Failed { guid, .. }
            | DownloadEvent::Canceled { guid } => guid,
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Mutations of the offline cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    EntryStored { guid: String, byte_length: u64 },
    EntryDeleted { guid: String },
    Cleared { entries_removed: usize },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::EntryStored { .. } => "Cache entry stored",
            CacheEvent::EntryDeleted { .. } => "Cache entry deleted",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers; publishers in
    /// this workspace ignore that case.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let downloads_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
