//! Shared fixtures for the playback integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{DeviceSignal, DeviceSignalSink, MediaDevice, MediaSource, StreamingResponse};
use bytes::Bytes;
use core_runtime::events::{CoreEvent, DownloadEvent, TransportEvent};
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;

/// Media device that records what the engine asks of it.
///
/// Like real players, opening a source resets the device rate to 1.0.
pub struct FakeDevice {
    rate: Mutex<f32>,
    volume: Mutex<f32>,
    calls: Mutex<Vec<String>>,
    opened: Mutex<Vec<(MediaSource, f64)>>,
    sinks: Mutex<Vec<Arc<dyn DeviceSignalSink>>>,
    fail_open: AtomicBool,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rate: Mutex::new(1.0),
            volume: Mutex::new(1.0),
            calls: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
        })
    }

    pub fn fail_next_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn rate(&self) -> f32 {
        *self.rate.lock()
    }

    /// Simulate the device dropping back to normal speed on its own.
    pub fn reset_rate(&self) {
        *self.rate.lock() = 1.0;
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn opened(&self) -> Vec<(MediaSource, f64)> {
        self.opened.lock().clone()
    }

    pub fn last_opened(&self) -> Option<(MediaSource, f64)> {
        self.opened.lock().last().cloned()
    }

    /// Sink handed to the `index`-th `open`.
    pub fn sink(&self, index: usize) -> Arc<dyn DeviceSignalSink> {
        self.sinks.lock()[index].clone()
    }

    pub fn signal(&self, index: usize, signal: DeviceSignal) {
        self.sink(index).emit(signal);
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl MediaDevice for FakeDevice {
    async fn open(
        &self,
        source: MediaSource,
        start_offset_secs: f64,
        sink: Arc<dyn DeviceSignalSink>,
    ) -> BridgeResult<()> {
        self.log(format!("open {}", source.describe()));
        *self.rate.lock() = 1.0;
        self.sinks.lock().push(sink);
        self.opened.lock().push((source, start_offset_secs));

        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("unsupported format".into()));
        }
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        self.log("play");
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.log("pause");
        Ok(())
    }

    async fn seek(&self, position_secs: f64) -> BridgeResult<()> {
        self.log(format!("seek {}", position_secs));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> BridgeResult<()> {
        *self.volume.lock() = volume;
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> BridgeResult<()> {
        *self.rate.lock() = rate;
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.log("close");
        Ok(())
    }
}

/// Let spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn transport_events(rx: &mut Receiver<CoreEvent>) -> Vec<TransportEvent> {
    drain(rx)
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::Transport(e) => Some(e),
            _ => None,
        })
        .collect()
}

pub fn download_events(rx: &mut Receiver<CoreEvent>) -> Vec<DownloadEvent> {
    drain(rx)
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::Download(e) => Some(e),
            _ => None,
        })
        .collect()
}

/// Wait until a download event satisfying `predicate` arrives.
pub async fn wait_for_download<F>(rx: &mut Receiver<CoreEvent>, predicate: F) -> DownloadEvent
where
    F: Fn(&DownloadEvent) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(CoreEvent::Download(event)) if predicate(&event) => return event,
            Ok(_) => {}
            Err(e) => panic!("event stream ended: {}", e),
        }
    }
}

pub type ChunkSender = mpsc::UnboundedSender<BridgeResult<Bytes>>;

/// A 200 response whose body is fed through the returned sender.
pub fn streamed_response(
    content_length: Option<u64>,
    content_type: Option<&str>,
) -> (ChunkSender, StreamingResponse) {
    let (tx, rx) = mpsc::unbounded();
    let response = StreamingResponse {
        status: 200,
        headers: HashMap::new(),
        content_type: content_type.map(str::to_string),
        content_length,
        body: Box::pin(rx),
    };
    (tx, response)
}

/// A 200 response that delivers `chunks` and ends.
pub fn complete_response(chunks: Vec<Bytes>, content_type: Option<&str>) -> StreamingResponse {
    let total = chunks.iter().map(|c| c.len() as u64).sum();
    let (tx, response) = streamed_response(Some(total), content_type);
    for chunk in chunks {
        tx.unbounded_send(Ok(chunk)).expect("receiver alive");
    }
    response
}

pub fn chunk(len: usize, fill: u8) -> Bytes {
    Bytes::from(vec![fill; len])
}
