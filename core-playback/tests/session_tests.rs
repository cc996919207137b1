//! End-to-end playback sessions with simulated time.

mod common;

use bridge_desktop::{MemoryBlobStore, MemoryStateStore};
use bridge_traits::{DeviceSignal, MediaSource};
use bytes::Bytes;
use common::{settle, FakeDevice};
use core_playback::cache::{CacheConfig, OfflineCacheStore};
use core_playback::ledger::{PositionLedger, DEFAULT_CADENCE};
use core_playback::resolver::SourceResolver;
use core_playback::session::PlaybackSession;
use core_playback::transport::{TransportEngine, TransportStatus};
use core_playback::EpisodeDescriptor;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    device: Arc<FakeDevice>,
    cache: Arc<OfflineCacheStore>,
    session: PlaybackSession,
}

fn harness() -> Harness {
    harness_with_bus(EventBus::new(256))
}

fn harness_with_bus(events: EventBus) -> Harness {
    let device = FakeDevice::new();
    let transport = TransportEngine::new(device.clone(), events);
    let ledger = Arc::new(PositionLedger::new(
        Arc::new(MemoryStateStore::new()),
        DEFAULT_CADENCE,
    ));
    let cache = Arc::new(OfflineCacheStore::new(
        Arc::new(MemoryBlobStore::new()),
        CacheConfig::default(),
    ));
    let session = PlaybackSession::new(transport, ledger, SourceResolver::new(cache.clone()));
    Harness {
        device,
        cache,
        session,
    }
}

fn e1() -> EpisodeDescriptor {
    EpisodeDescriptor::new("abc", "http://x/a.mp3").with_title("Episode one")
}

fn e2() -> EpisodeDescriptor {
    EpisodeDescriptor::new("def", "http://x/b.mp3").with_title("Episode two")
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_pause_and_stop() {
    let h = harness();
    let ledger = h.session.ledger().clone();
    assert_eq!(ledger.recall("abc"), 0.0);

    h.session.play_episode(e1()).await;
    assert_eq!(
        h.device.last_opened(),
        Some((MediaSource::network("http://x/a.mp3"), 0.0))
    );
    assert_eq!(h.session.transport().status(), TransportStatus::Playing);

    tokio::time::sleep(Duration::from_secs(7)).await;
    let recorded = ledger.recall("abc");
    assert!(
        (5.0..10.0).contains(&recorded),
        "expected one cadence write, got {}",
        recorded
    );

    h.session.transport().pause().await;
    settle().await;
    assert_eq!(ledger.recall("abc"), 7.0);

    // Paused time is not playing time.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ledger.recall("abc"), 7.0);

    h.session.stop().await;
    assert_eq!(h.session.current_episode(), None);
    assert_eq!(h.session.transport().status(), TransportStatus::Idle);

    h.session.play_episode(e1()).await;
    assert_eq!(
        h.device.last_opened(),
        Some((MediaSource::network("http://x/a.mp3"), 7.0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cached_episode_plays_offline() {
    let h = harness();
    h.cache
        .put("abc", "audio/mpeg", Bytes::from_static(b"offline bytes"))
        .await
        .unwrap();

    h.session.play_episode(e1()).await;

    match h.device.last_opened() {
        Some((MediaSource::Cached { guid, data, .. }, offset)) => {
            assert_eq!(guid, "abc");
            assert_eq!(data, Bytes::from_static(b"offline bytes"));
            assert_eq!(offset, 0.0);
        }
        other => panic!("expected cached source, got {:?}", other),
    }

    // Deleting the entry does not pull the bytes out from under the device.
    h.cache.delete("abc").await.unwrap();
    assert_eq!(h.session.transport().status(), TransportStatus::Playing);

    h.session.stop().await;
    h.session.play_episode(e1()).await;
    assert!(matches!(
        h.device.last_opened(),
        Some((MediaSource::Network { .. }, _))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_ended_episode_restarts_from_beginning() {
    let h = harness();
    let ledger = h.session.ledger().clone();

    h.session.play_episode(e1()).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(ledger.recall("abc") > 0.0);

    h.device.signal(0, DeviceSignal::Ended);
    settle().await;
    assert_eq!(ledger.recall("abc"), 0.0);
    assert_eq!(ledger.cadence_guid(), None);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(ledger.recall("abc"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_switching_episodes_saves_previous_position() {
    let h = harness();
    let ledger = h.session.ledger().clone();

    h.session.play_episode(e1()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    h.session.play_episode(e2()).await;
    assert_eq!(ledger.recall("abc"), 3.0);
    assert_eq!(h.session.current_episode().map(|e| e.guid), Some("def".into()));

    settle().await;
    assert_eq!(ledger.cadence_guid().as_deref(), Some("def"));

    // Signals from the first episode's source no longer reach the session.
    h.device.signal(0, DeviceSignal::Ended);
    settle().await;
    assert_eq!(ledger.recall("abc"), 3.0);
    assert_eq!(h.session.transport().status(), TransportStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_queue_navigation() {
    let h = harness();
    let queue = vec![e1(), e2()];

    assert!(h.session.play_previous(&queue).await.is_none());

    h.session.play_next(&queue).await.unwrap();
    assert_eq!(h.session.current_episode().unwrap().guid, "abc");

    h.session.play_next(&queue).await.unwrap();
    assert_eq!(h.session.current_episode().unwrap().guid, "def");

    assert!(h.session.play_next(&queue).await.is_none());

    h.session.play_previous(&queue).await.unwrap();
    assert_eq!(h.session.current_episode().unwrap().guid, "abc");
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_halts_cadence() {
    let h = harness();
    let ledger = h.session.ledger().clone();
    h.device.fail_next_open(true);

    h.session.play_episode(e1()).await;
    settle().await;

    assert_eq!(h.session.transport().status(), TransportStatus::Error);
    assert_eq!(ledger.cadence_guid(), None);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(ledger.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_busy_bus_does_not_stall_cadence() {
    let h = harness_with_bus(EventBus::new(2));
    let ledger = h.session.ledger().clone();

    h.session.play_episode(e1()).await;
    // Unrelated traffic overruns the bus before the session looks at it.
    for _ in 0..32 {
        let _ = h.session.transport().events().emit(CoreEvent::Download(
            DownloadEvent::Canceled {
                guid: "other".into(),
            },
        ));
    }

    tokio::time::sleep(Duration::from_secs(7)).await;
    let recorded = ledger.recall("abc");
    assert!(
        (5.0..10.0).contains(&recorded),
        "cadence never started, got {}",
        recorded
    );

    h.session.transport().pause().await;
    settle().await;
    assert_eq!(ledger.recall("abc"), 7.0);
}
