//! Download an episode for offline use, then play it through a console device.
//!
//! ```text
//! cargo run -p core-playback --example offline_demo -- https://example.com/episode.mp3
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use bridge_desktop::{FsBlobStore, MemoryStateStore, ReqwestHttpClient};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::time::{ConsoleLogger, LogLevel};
use bridge_traits::{DeviceSignal, DeviceSignalSink, MediaDevice, MediaSource};
use core_playback::{
    format_time, CacheConfig, DownloadConfig, DownloadCoordinator, EpisodeDescriptor,
    OfflineCacheStore, PlaybackSession, PositionLedger, SourceResolver, TransportEngine,
};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Prints what it is asked to do and reports a fixed duration.
#[derive(Default)]
struct ConsoleDevice {
    sink: Mutex<Option<Arc<dyn DeviceSignalSink>>>,
}

#[async_trait]
impl MediaDevice for ConsoleDevice {
    async fn open(
        &self,
        source: MediaSource,
        start_offset_secs: f64,
        sink: Arc<dyn DeviceSignalSink>,
    ) -> BridgeResult<()> {
        println!("device: open {} at {}", source.describe(), format_time(start_offset_secs));
        sink.emit(DeviceSignal::MetadataLoaded {
            duration_secs: 1800.0,
        });
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        println!("device: play");
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.emit(DeviceSignal::Playing);
        }
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        println!("device: pause");
        Ok(())
    }

    async fn seek(&self, position_secs: f64) -> BridgeResult<()> {
        println!("device: seek {}", format_time(position_secs));
        Ok(())
    }

    async fn set_volume(&self, _volume: f32) -> BridgeResult<()> {
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> BridgeResult<()> {
        println!("device: rate {}x", rate);
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        println!("device: close");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Warnings are mirrored to the console sink as a stand-in for a host logger.
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_logger_sink(Arc::new(ConsoleLogger {
                min_level: LogLevel::Warn,
            })),
    )?;

    let url = std::env::args()
        .nth(1)
        .context("usage: offline_demo <episode-url>")?;
    let cache_dir = tempfile::tempdir()?;
    let events = EventBus::default();

    let cache = Arc::new(
        OfflineCacheStore::new(
            Arc::new(FsBlobStore::new(cache_dir.path())),
            CacheConfig::default(),
        )
        .with_events(events.clone()),
    );
    cache.initialize().await?;

    let downloads = DownloadCoordinator::new(
        Arc::new(ReqwestHttpClient::new()?),
        cache.clone(),
        DownloadConfig::default(),
        events.clone(),
    );

    let episode = EpisodeDescriptor::new(EpisodeDescriptor::synthetic_guid(&url, 0), url.clone())
        .with_title("Demo episode");

    let mut progress = events.subscribe();
    let watched = downloads.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            if let CoreEvent::Download(DownloadEvent::Progress {
                guid,
                received_bytes,
                percent,
                ..
            }) = event
            {
                let rate = watched
                    .progress(&guid)
                    .map(|p| format!("{}, eta {}", p.speed_string(), p.eta_string()))
                    .unwrap_or_default();
                match percent {
                    Some(p) => println!("download: {}% ({} bytes) {}", p, received_bytes, rate),
                    None => println!("download: {} bytes {}", received_bytes, rate),
                }
            }
        }
    });

    let entry = downloads.start(&episode)?.wait().await?;
    println!(
        "cached {} ({} bytes, {})",
        entry.guid, entry.byte_length, entry.content_type
    );
    printer.abort();

    let transport = TransportEngine::new(Arc::new(ConsoleDevice::default()), events.clone());
    let ledger = Arc::new(PositionLedger::new(
        Arc::new(MemoryStateStore::new()),
        Duration::from_secs(1),
    ));
    let session = PlaybackSession::new(transport, ledger.clone(), SourceResolver::new(cache));

    session.transport().set_rate(1.5).await;
    session.play_episode(episode.clone()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    session.stop().await;

    println!(
        "resume point for {}: {}",
        episode.guid,
        format_time(ledger.recall(&episode.guid))
    );
    Ok(())
}
