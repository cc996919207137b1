//! # Playback Session
//!
//! Ties the resolver, ledger and transport together for one listener.
//!
//! Playing an episode halts the previous episode's cadence, resolves the
//! source, recalls the resume offset and loads it. A background listener
//! follows transport events for the current source and keeps the ledger's
//! cadence in step with the transport status. It reads the transport's own
//! observer channel rather than the shared event bus, so download traffic
//! on the bus can never make it miss a transition.

use core_runtime::events::TransportEvent;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::ledger::PositionLedger;
use crate::resolver::SourceResolver;
use crate::transport::{SourceId, TransportEngine, TransportStatus};
use crate::types::EpisodeDescriptor;

struct Current {
    episode: EpisodeDescriptor,
    source_id: Option<SourceId>,
}

struct SessionInner {
    transport: TransportEngine,
    ledger: Arc<PositionLedger>,
    resolver: SourceResolver,
    current: Mutex<Option<Current>>,
}

/// The "currently playing" episode and everything that follows from it.
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
    listener: JoinHandle<()>,
}

impl PlaybackSession {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        transport: TransportEngine,
        ledger: Arc<PositionLedger>,
        resolver: SourceResolver,
    ) -> Self {
        let events = transport.observe();
        let inner = Arc::new(SessionInner {
            transport,
            ledger,
            resolver,
            current: Mutex::new(None),
        });
        let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));

        Self { inner, listener }
    }

    pub fn transport(&self) -> &TransportEngine {
        &self.inner.transport
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.inner.ledger
    }

    pub fn current_episode(&self) -> Option<EpisodeDescriptor> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|c| c.episode.clone())
    }

    /// Make `episode` the current one and start playing it from its
    /// recorded position.
    ///
    /// Returns once the source has been loaded and playback requested.
    #[instrument(skip(self, episode), fields(guid = %episode.guid))]
    pub async fn play_episode(&self, episode: EpisodeDescriptor) -> SourceId {
        let inner = &self.inner;
        inner.ledger.halt_cadence();
        inner.checkpoint().await;

        let target = inner.resolver.resolve(&episode).await;
        let offset = inner.ledger.recall(&episode.guid);
        info!(
            offline = target.is_offline(),
            offset, "Playing episode {}", episode.guid
        );

        let guid = episode.guid.clone();
        *inner.current.lock() = Some(Current {
            episode,
            source_id: None,
        });

        let source_id = inner.transport.load(target.source, offset).await;
        if let Some(current) = inner.current.lock().as_mut() {
            if current.episode.guid == guid {
                current.source_id = Some(source_id);
            }
        }

        inner.transport.play().await;
        source_id
    }

    /// Record where the current episode is, then stop the transport.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.ledger.halt_cadence();
        inner.checkpoint().await;
        inner.transport.stop().await;
        *inner.current.lock() = None;
    }

    /// Play the episode after the current one in `queue`, or the first one
    /// when nothing is current.
    pub async fn play_next(&self, queue: &[EpisodeDescriptor]) -> Option<SourceId> {
        let next = match self.position_in(queue) {
            Some(index) => index + 1,
            None => 0,
        };
        let episode = queue.get(next)?.clone();
        Some(self.play_episode(episode).await)
    }

    /// Play the episode before the current one in `queue`.
    pub async fn play_previous(&self, queue: &[EpisodeDescriptor]) -> Option<SourceId> {
        let previous = self.position_in(queue)?.checked_sub(1)?;
        let episode = queue.get(previous)?.clone();
        Some(self.play_episode(episode).await)
    }

    fn position_in(&self, queue: &[EpisodeDescriptor]) -> Option<usize> {
        let current = self.inner.current.lock();
        let guid = &current.as_ref()?.episode.guid;
        queue.iter().position(|e| &e.guid == guid)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.listener.abort();
        self.inner.ledger.halt_cadence();
    }
}

impl SessionInner {
    /// Guid of the current episode if `source_id` is its source.
    fn guid_for(&self, source_id: SourceId) -> Option<String> {
        let current = self.current.lock();
        current
            .as_ref()
            .filter(|c| c.source_id == Some(source_id))
            .map(|c| c.episode.guid.clone())
    }

    /// Save the position of the current episode if it is loaded.
    async fn checkpoint(&self) {
        let Some(guid) = self
            .transport
            .current_source()
            .and_then(|id| self.guid_for(id))
        else {
            return;
        };

        let state = self.transport.state();
        if matches!(
            state.status,
            TransportStatus::Playing | TransportStatus::Paused
        ) {
            self.record(&guid, state.position_secs).await;
        }
    }

    async fn record(&self, guid: &str, position_secs: f64) {
        if let Err(e) = self.ledger.record(guid, position_secs).await {
            warn!("Failed to record position for {}: {}", guid, e);
        }
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        let Some(source_id) = event.source_id() else {
            return;
        };
        let Some(guid) = self.guid_for(source_id) else {
            return;
        };

        match event {
            TransportEvent::Started { .. } => {
                let transport = self.transport.clone();
                self.ledger.start_cadence(&guid, move || {
                    let state = transport.state();
                    (state.status == TransportStatus::Playing).then_some(state.position_secs)
                });
            }
            TransportEvent::Paused { position_ms, .. } => {
                self.ledger.halt_cadence();
                self.record(&guid, position_ms as f64 / 1000.0).await;
            }
            TransportEvent::Ended { .. } => {
                self.ledger.halt_cadence();
                self.record(&guid, 0.0).await;
            }
            TransportEvent::Stopped { .. } | TransportEvent::Error { .. } => {
                self.ledger.halt_cadence();
            }
            _ => {}
        }
    }
}

async fn listen(session: Weak<SessionInner>, mut events: UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.on_transport_event(event).await;
    }
    debug!("Session listener finished");
}
