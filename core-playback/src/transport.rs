//! # Transport Engine
//!
//! Drives the host [`MediaDevice`] for one source at a time and publishes an
//! ordered stream of [`TransportEvent`]s.
//!
//! ## State machine
//!
//! ```text
//!            load()                play()              pause()
//!   Idle ───────────▶ Loading ───────────▶ Playing ◀──────────▶ Paused
//!     ▲                  │                    │
//!     │ stop()           │ open failed        │ device Ended
//!     │                  ▼                    ▼
//!     └────────────── Error               Ended ──play()──▶ Playing
//! ```
//!
//! Every state change publishes its event while the state lock is held, so
//! subscribers observe events in exactly the order the state changed.
//!
//! Events go to the shared [`EventBus`] and to every [`observe`] channel.
//! The bus is bounded and may drop events for a slow subscriber; observer
//! channels are unbounded and never skip one.
//!
//! [`observe`]: TransportEngine::observe
//!
//! Each `load()` gets a fresh [`SourceId`]. Device callbacks are routed
//! through a sink bound to that id; once a newer load has been issued the
//! sink's signals are dropped, so nothing from a superseded source is
//! published after the new source's first event.

use bridge_traits::{DeviceSignal, DeviceSignalSink, MediaDevice, MediaSource};
use core_runtime::events::{CoreEvent, EventBus, TransportEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::PlaybackError;

/// Identifies one `load()` call.
pub type SourceId = u64;

/// A device-reported seek further than this from the request is a correction.
pub const SEEK_CORRECTION_EPSILON_SECS: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Error,
}

/// Playback speed, always one of [`PlaybackRate::SUPPORTED`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRate(f32);

impl PlaybackRate {
    pub const SUPPORTED: [f32; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];
    pub const NORMAL: PlaybackRate = PlaybackRate(1.0);

    /// Snap `rate` to the closest supported speed. Ties go to the slower one.
    pub fn nearest(rate: f32) -> Self {
        if !rate.is_finite() {
            return Self::NORMAL;
        }

        let mut best = Self::SUPPORTED[0];
        for candidate in Self::SUPPORTED {
            if (candidate - rate).abs() < (best - rate).abs() {
                best = candidate;
            }
        }
        PlaybackRate(best)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Snapshot of the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub status: TransportStatus,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    /// In `[0, 1]`.
    pub volume: f32,
    pub rate: PlaybackRate,
    pub buffering: bool,
}

struct EngineState {
    status: TransportStatus,
    duration: Option<f64>,
    volume: f32,
    rate: PlaybackRate,
    buffering: bool,

    /// Position at `anchored_at`; the clock runs only while playing.
    anchor_position: f64,
    anchored_at: Option<Instant>,

    source: Option<SourceId>,
    opened: bool,
    pending_seek: Option<f64>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            status: TransportStatus::Idle,
            duration: None,
            volume: 1.0,
            rate: PlaybackRate::NORMAL,
            buffering: false,
            anchor_position: 0.0,
            anchored_at: None,
            source: None,
            opened: false,
            pending_seek: None,
        }
    }

    fn position(&self) -> f64 {
        let position = match self.anchored_at {
            Some(at) => {
                self.anchor_position + at.elapsed().as_secs_f64() * f64::from(self.rate.value())
            }
            None => self.anchor_position,
        };
        clamp_position(position, self.duration)
    }

    fn set_position(&mut self, position: f64) {
        self.anchor_position = position;
        if self.anchored_at.is_some() {
            self.anchored_at = Some(Instant::now());
        }
    }

    /// Run the clock exactly while playing and not stalled.
    fn sync_clock(&mut self) {
        let running = self.status == TransportStatus::Playing && !self.buffering;
        match (running, self.anchored_at) {
            (true, None) => self.anchored_at = Some(Instant::now()),
            (false, Some(_)) => {
                self.anchor_position = self.position();
                self.anchored_at = None;
            }
            _ => {}
        }
    }

    fn set_status(&mut self, status: TransportStatus) {
        self.status = status;
        self.sync_clock();
    }

    fn bind(&mut self, source_id: SourceId, start: f64) {
        self.source = Some(source_id);
        self.opened = false;
        self.duration = None;
        self.buffering = false;
        self.pending_seek = None;
        self.anchored_at = None;
        self.anchor_position = start;
        self.status = TransportStatus::Loading;
    }

    fn snapshot(&self) -> TransportState {
        TransportState {
            status: self.status,
            position_secs: self.position(),
            duration_secs: self.duration,
            volume: self.volume,
            rate: self.rate,
            buffering: self.buffering,
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        self.duration.map(millis)
    }
}

struct EngineInner {
    device: Arc<dyn MediaDevice>,
    events: EventBus,
    observers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    next_source: AtomicU64,
    state: Mutex<EngineState>,
    /// Held across every `device.set_rate` call
    rate_writes: AsyncMutex<()>,
}

impl EngineInner {
    /// Callers hold the state lock.
    fn publish(&self, event: TransportEvent) {
        trace!(?event, "Transport event");
        self.observers
            .lock()
            .retain(|observer| observer.send(event.clone()).is_ok());
        let _ = self.events.emit(CoreEvent::Transport(event));
    }

    /// Push the current rate to the device.
    ///
    /// The rate is read after taking the write lock, so whichever write runs
    /// last applies the latest rate.
    async fn push_rate(&self) {
        let _writing = self.rate_writes.lock().await;
        let rate = {
            let state = self.state.lock();
            if !state.opened {
                return;
            }
            state.rate
        };
        if let Err(e) = self.device.set_rate(rate.value()).await {
            warn!("Failed to apply playback rate: {}", e);
        }
    }

    fn publish_error(&self, source_id: Option<SourceId>, error: PlaybackError) {
        warn!(source_id, "Transport error: {}", error);
        self.publish(TransportEvent::Error {
            source_id,
            message: error.to_string(),
            recoverable: error.is_transient(),
        });
    }

    fn handle_signal(self: &Arc<Self>, source_id: SourceId, signal: DeviceSignal) {
        let mut reapply_rate = false;
        {
            let mut state = self.state.lock();
            if state.source != Some(source_id) {
                debug!(source_id, ?signal, "Dropping signal from superseded source");
                return;
            }

            match signal {
                DeviceSignal::MetadataLoaded { duration_secs } => {
                    if duration_secs.is_finite() && duration_secs > 0.0 {
                        state.duration = Some(duration_secs);
                        let position = state.position();
                        state.set_position(position);
                        self.publish(TransportEvent::DurationKnown {
                            source_id,
                            duration_ms: millis(duration_secs),
                        });
                    }
                    reapply_rate = true;
                }
                DeviceSignal::TimeUpdate { position_secs } => {
                    let settled = matches!(
                        state.status,
                        TransportStatus::Idle | TransportStatus::Ended | TransportStatus::Error
                    );
                    if !settled && position_secs.is_finite() {
                        let position = clamp_position(position_secs, state.duration);
                        state.set_position(position);
                        self.publish(TransportEvent::PositionChanged {
                            source_id,
                            position_ms: millis(position),
                            duration_ms: state.duration_ms(),
                        });
                    }
                }
                DeviceSignal::Playing => {
                    if state.buffering {
                        state.buffering = false;
                        self.publish(TransportEvent::BufferingEnded { source_id });
                    }
                    if state.status != TransportStatus::Playing {
                        state.set_status(TransportStatus::Playing);
                        self.publish(TransportEvent::Started { source_id });
                    }
                    state.sync_clock();
                }
                DeviceSignal::Paused => {
                    if state.status == TransportStatus::Playing {
                        state.set_status(TransportStatus::Paused);
                        self.publish(TransportEvent::Paused {
                            source_id,
                            position_ms: millis(state.position()),
                        });
                    }
                }
                DeviceSignal::Waiting => {
                    if !state.buffering {
                        state.buffering = true;
                        state.sync_clock();
                        self.publish(TransportEvent::BufferingStarted { source_id });
                    }
                }
                DeviceSignal::CanPlay => {
                    if state.buffering {
                        state.buffering = false;
                        state.sync_clock();
                        self.publish(TransportEvent::BufferingEnded { source_id });
                    }
                    reapply_rate = true;
                }
                DeviceSignal::Seeked { position_secs } => {
                    if position_secs.is_finite() {
                        let actual = clamp_position(position_secs, state.duration);
                        let requested = state.pending_seek.take();
                        state.set_position(actual);
                        if let Some(requested) = requested {
                            if (actual - requested).abs() > SEEK_CORRECTION_EPSILON_SECS {
                                self.publish(TransportEvent::SeekCorrected {
                                    source_id,
                                    requested_ms: millis(requested),
                                    actual_ms: millis(actual),
                                });
                            }
                        }
                    }
                }
                DeviceSignal::Ended => {
                    state.buffering = false;
                    state.pending_seek = None;
                    state.set_status(TransportStatus::Ended);
                    state.anchor_position = 0.0;
                    info!(source_id, "Playback ended");
                    self.publish(TransportEvent::Ended { source_id });
                }
                DeviceSignal::Failed { message } => {
                    state.buffering = false;
                    state.set_status(TransportStatus::Error);
                    self.publish_error(Some(source_id), PlaybackError::SourceUnavailable(message));
                }
            }
        }

        if reapply_rate {
            self.reapply_rate();
        }
    }

    /// Opening a source resets the device rate; push ours back.
    fn reapply_rate(self: &Arc<Self>) {
        let engine = Arc::clone(self);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { engine.push_rate().await });
            }
            Err(_) => warn!("No runtime available to reapply playback rate"),
        }
    }
}

/// Routes device callbacks for one source back into the engine.
struct SourceSink {
    engine: Weak<EngineInner>,
    source_id: SourceId,
}

impl DeviceSignalSink for SourceSink {
    fn emit(&self, signal: DeviceSignal) {
        if let Some(engine) = self.engine.upgrade() {
            engine.handle_signal(self.source_id, signal);
        }
    }
}

/// Owner of the process-wide transport state.
///
/// Control operations never return errors: failures become
/// [`TransportEvent::Error`] events and an `Error` status.
#[derive(Clone)]
pub struct TransportEngine {
    inner: Arc<EngineInner>,
}

impl TransportEngine {
    pub fn new(device: Arc<dyn MediaDevice>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                device,
                events,
                observers: Mutex::new(Vec::new()),
                next_source: AtomicU64::new(0),
                state: Mutex::new(EngineState::new()),
                rate_writes: AsyncMutex::new(()),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Lossless feed of every transport event published from now on.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.observers.lock().push(tx);
        rx
    }

    pub fn state(&self) -> TransportState {
        self.inner.state.lock().snapshot()
    }

    pub fn status(&self) -> TransportStatus {
        self.inner.state.lock().status
    }

    pub fn position(&self) -> f64 {
        self.inner.state.lock().position()
    }

    /// The source bound by the latest `load()`, until `stop()`.
    pub fn current_source(&self) -> Option<SourceId> {
        self.inner.state.lock().source
    }

    /// Bind `source`, starting at `start_offset_secs`.
    ///
    /// Supersedes any earlier load. If the device cannot open the source
    /// the status becomes `Error` and an error event is published.
    #[instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn load(&self, source: MediaSource, start_offset_secs: f64) -> SourceId {
        let source_id = self.inner.next_source.fetch_add(1, Ordering::SeqCst) + 1;
        let start = clamp_position(start_offset_secs, None);

        {
            let mut state = self.inner.state.lock();
            state.bind(source_id, start);
            self.inner.publish(TransportEvent::Loading {
                source_id,
                source: source.describe(),
                start_position_ms: millis(start),
            });
        }
        info!(source_id, start, "Loading source");

        let sink: Arc<dyn DeviceSignalSink> = Arc::new(SourceSink {
            engine: Arc::downgrade(&self.inner),
            source_id,
        });

        if let Err(e) = self.inner.device.open(source, start, sink).await {
            let mut state = self.inner.state.lock();
            if state.source == Some(source_id) {
                state.set_status(TransportStatus::Error);
                self.inner
                    .publish_error(Some(source_id), PlaybackError::SourceUnavailable(e.to_string()));
            }
            return source_id;
        }

        let (volume, pending_seek) = {
            let mut state = self.inner.state.lock();
            if state.source != Some(source_id) {
                debug!(source_id, "Load superseded while opening");
                return source_id;
            }
            state.opened = true;
            (state.volume, state.pending_seek)
        };

        let device = &self.inner.device;
        if let Err(e) = device.set_volume(volume).await {
            warn!("Failed to apply volume: {}", e);
        }
        self.inner.push_rate().await;
        if let Some(position) = pending_seek {
            if let Err(e) = device.seek(position).await {
                warn!("Failed to apply pending seek: {}", e);
            }
        }

        source_id
    }

    /// Start or resume playback.
    ///
    /// Without an opened source this publishes an error event and does
    /// nothing else.
    pub async fn play(&self) {
        let source_id = {
            let state = self.inner.state.lock();
            match (state.source, state.opened, state.status) {
                (Some(_), true, TransportStatus::Playing) => return,
                (
                    Some(id),
                    true,
                    TransportStatus::Loading | TransportStatus::Paused | TransportStatus::Ended,
                ) => id,
                (source, ..) => {
                    self.inner.publish_error(
                        source,
                        PlaybackError::SourceUnavailable("No playable source is open".to_string()),
                    );
                    return;
                }
            }
        };

        let result = self.inner.device.play().await;

        let mut state = self.inner.state.lock();
        if state.source != Some(source_id) {
            return;
        }
        match result {
            Ok(()) => {
                if state.status != TransportStatus::Playing {
                    state.set_status(TransportStatus::Playing);
                    self.inner.publish(TransportEvent::Started { source_id });
                }
            }
            Err(e) => {
                state.set_status(TransportStatus::Error);
                self.inner
                    .publish_error(Some(source_id), PlaybackError::SourceUnavailable(e.to_string()));
            }
        }
    }

    /// Pause if playing; otherwise a no-op.
    pub async fn pause(&self) {
        let source_id = {
            let state = self.inner.state.lock();
            match (state.source, state.status) {
                (Some(id), TransportStatus::Playing) => id,
                _ => return,
            }
        };

        let result = self.inner.device.pause().await;

        let mut state = self.inner.state.lock();
        if state.source != Some(source_id) {
            return;
        }
        match result {
            Ok(()) => {
                if state.status == TransportStatus::Playing {
                    state.set_status(TransportStatus::Paused);
                    self.inner.publish(TransportEvent::Paused {
                        source_id,
                        position_ms: millis(state.position()),
                    });
                }
            }
            Err(e) => self.inner.publish_error(
                Some(source_id),
                PlaybackError::SourceUnavailable(format!("Pause failed: {}", e)),
            ),
        }
    }

    pub async fn toggle_play(&self) {
        if self.status() == TransportStatus::Playing {
            self.pause().await;
        } else {
            self.play().await;
        }
    }

    /// Move to `target_secs`, clamped to `[0, duration]`.
    ///
    /// The observable position changes before the device confirms. Returns
    /// the clamped position.
    pub async fn seek(&self, target_secs: f64) -> f64 {
        let (source_id, position, opened) = {
            let mut state = self.inner.state.lock();
            let Some(source_id) = state.source else {
                return state.position();
            };
            if !target_secs.is_finite() {
                return state.position();
            }

            let position = clamp_position(target_secs, state.duration);
            state.set_position(position);
            state.pending_seek = Some(position);
            self.inner.publish(TransportEvent::PositionChanged {
                source_id,
                position_ms: millis(position),
                duration_ms: state.duration_ms(),
            });
            (source_id, position, state.opened)
        };

        if opened {
            if let Err(e) = self.inner.device.seek(position).await {
                let state = self.inner.state.lock();
                if state.source == Some(source_id) {
                    self.inner.publish_error(
                        Some(source_id),
                        PlaybackError::SourceUnavailable(format!("Seek failed: {}", e)),
                    );
                }
            }
        }
        position
    }

    /// Seek relative to the current position.
    pub async fn skip(&self, delta_secs: f64) -> f64 {
        let target = self.position() + delta_secs;
        self.seek(target).await
    }

    /// Set the output volume, clamped to `[0, 1]`. Returns the applied value.
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let (volume, opened) = {
            let mut state = self.inner.state.lock();
            if volume.is_finite() {
                state.volume = volume.clamp(0.0, 1.0);
            }
            (state.volume, state.opened)
        };

        if opened {
            if let Err(e) = self.inner.device.set_volume(volume).await {
                warn!("Failed to apply volume: {}", e);
            }
        }
        volume
    }

    /// Set the playback speed, snapped to a supported rate.
    ///
    /// The rate survives `load()`: it is pushed to the device again after
    /// every open and whenever the device reports new metadata.
    pub async fn set_rate(&self, rate: f32) -> PlaybackRate {
        let rate = PlaybackRate::nearest(rate);
        {
            let mut state = self.inner.state.lock();
            let position = state.position();
            state.set_position(position);
            state.rate = rate;
        }

        self.inner.push_rate().await;
        debug!(rate = rate.value(), "Playback rate set");
        rate
    }

    /// Release the source and return to `Idle`.
    pub async fn stop(&self) {
        let source_id = {
            let mut state = self.inner.state.lock();
            let Some(source_id) = state.source.take() else {
                return;
            };
            state.opened = false;
            state.duration = None;
            state.buffering = false;
            state.pending_seek = None;
            state.set_status(TransportStatus::Idle);
            state.anchor_position = 0.0;
            self.inner.publish(TransportEvent::Stopped { source_id });
            source_id
        };

        if let Err(e) = self.inner.device.close().await {
            warn!(source_id, "Failed to close media device: {}", e);
        }
        info!(source_id, "Transport stopped");
    }
}

fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    if !position.is_finite() {
        return 0.0;
    }
    let position = position.max(0.0);
    match duration {
        Some(duration) => position.min(duration),
        None => position,
    }
}

fn millis(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}
