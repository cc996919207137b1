//! Download coordinator behavior against scripted upstream responses.

mod common;

use async_trait::async_trait;
use bridge_desktop::MemoryBlobStore;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{HttpClient, HttpRequest, HttpResponse, StreamingResponse};
use bytes::Bytes;
use common::{
    chunk, complete_response, download_events, settle, streamed_response, wait_for_download,
};
use core_playback::cache::stats::PROGRESS_BYTE_STEP;
use core_playback::cache::{CacheConfig, DownloadConfig, OfflineCacheStore};
use core_playback::download::{DownloadCoordinator, JobState, DEFAULT_CONTENT_TYPE};
use core_playback::{EpisodeDescriptor, PlaybackError};
use core_runtime::events::{DownloadEvent, EventBus};
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        async fn stream(&self, request: HttpRequest) -> BridgeResult<StreamingResponse>;
    }
}

/// Upstream that hands out the queued responses in order.
fn scripted(responses: Vec<BridgeResult<StreamingResponse>>) -> MockHttp {
    let count = responses.len();
    let queue = Mutex::new(VecDeque::from(responses));
    let mut http = MockHttp::new();
    http.expect_stream().times(count).returning(move |_| {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("more requests than scripted responses")
    });
    http
}

struct Harness {
    cache: Arc<OfflineCacheStore>,
    coordinator: DownloadCoordinator,
    events: EventBus,
}

fn harness(http: impl HttpClient + 'static, config: DownloadConfig) -> Harness {
    let events = EventBus::new(256);
    let cache = Arc::new(
        OfflineCacheStore::new(Arc::new(MemoryBlobStore::new()), CacheConfig::default())
            .with_events(events.clone()),
    );
    let coordinator =
        DownloadCoordinator::new(Arc::new(http), cache.clone(), config, events.clone());
    Harness {
        cache,
        coordinator,
        events,
    }
}

fn episode() -> EpisodeDescriptor {
    EpisodeDescriptor::new("abc", "http://x/a.mp3")
}

#[tokio::test]
async fn test_failed_download_then_retry() {
    let (tx, first) = streamed_response(Some(1000), Some("audio/mpeg"));
    let second = complete_response((0..10).map(|i| chunk(100, i)).collect(), Some("audio/mpeg"));
    let h = harness(scripted(vec![Ok(first), Ok(second)]), DownloadConfig::default());
    let mut rx = h.events.subscribe();

    let handle = h.coordinator.start(&episode()).unwrap();
    for i in 0..5 {
        tx.unbounded_send(Ok(chunk(100, i))).unwrap();
    }
    wait_for_download(&mut rx, |e| {
        matches!(e, DownloadEvent::Progress { received_bytes: 500, .. })
    })
    .await;

    let progress = h.coordinator.progress("abc").unwrap();
    assert_eq!(progress.percent, Some(50));
    assert_eq!(progress.received_bytes, 500);
    assert!(h.coordinator.is_downloading("abc"));
    assert!(!h.cache.has("abc"));

    tx.unbounded_send(Err(BridgeError::Network("connection reset".into())))
        .unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PlaybackError::NetworkFailure(_)));
    assert!(!h.cache.has("abc"));
    assert!(!h.coordinator.is_downloading("abc"));

    let failed = wait_for_download(&mut rx, |e| matches!(e, DownloadEvent::Failed { .. })).await;
    assert!(matches!(failed, DownloadEvent::Failed { retryable: true, .. }));

    let entry = h.coordinator.start(&episode()).unwrap().wait().await.unwrap();
    assert_eq!(entry.byte_length, 1000);
    assert!(h.cache.has("abc"));

    let (meta, payload) = h.cache.get("abc").await.unwrap().unwrap();
    assert_eq!(payload.len(), 1000);
    assert_eq!(&payload[500..600], &[5u8; 100][..]);
    assert_eq!(meta.content_type, "audio/mpeg");
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_at_commit() {
    let response = complete_response((0..4).map(|_| chunk(250, 1)).collect(), None);
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());
    let mut rx = h.events.subscribe();

    h.coordinator.start(&episode()).unwrap().wait().await.unwrap();

    let events = download_events(&mut rx);
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { percent, .. } => *percent,
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![25, 50, 75, 99, 100]);

    let committed_at = events
        .iter()
        .position(|e| matches!(e, DownloadEvent::Committed { .. }))
        .unwrap();
    let hundred_at = events
        .iter()
        .position(|e| matches!(e, DownloadEvent::Progress { percent: Some(100), .. }))
        .unwrap();
    assert!(hundred_at < committed_at);
    assert!(matches!(
        events.first(),
        Some(DownloadEvent::Started {
            total_bytes: Some(1000),
            ..
        })
    ));
}

#[tokio::test]
async fn test_rejections() {
    let (_tx, pending) = streamed_response(Some(10), None);
    let h = harness(scripted(vec![Ok(pending)]), DownloadConfig::default());

    let handle = h.coordinator.start(&episode()).unwrap();
    settle().await;
    assert!(matches!(
        h.coordinator.start(&episode()),
        Err(PlaybackError::AlreadyDownloading(_))
    ));
    assert_eq!(h.coordinator.active_downloads(), vec!["abc".to_string()]);
    assert_eq!(h.coordinator.job_state("abc"), Some(JobState::Active));

    handle.cancel();
    assert!(matches!(handle.wait().await, Err(PlaybackError::Canceled(_))));

    h.cache
        .put("def", "audio/mpeg", Bytes::from_static(b"cached"))
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator
            .start(&EpisodeDescriptor::new("def", "http://x/d.mp3")),
        Err(PlaybackError::AlreadyExists(_))
    ));
    assert!(matches!(
        h.coordinator.cancel("nothing"),
        Err(PlaybackError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_at_sixty_percent_commits_nothing() {
    let (tx, response) = streamed_response(Some(1000), Some("audio/mpeg"));
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());
    let mut rx = h.events.subscribe();

    let handle = h.coordinator.start(&episode()).unwrap();
    for _ in 0..6 {
        tx.unbounded_send(Ok(chunk(100, 7))).unwrap();
    }
    wait_for_download(&mut rx, |e| {
        matches!(e, DownloadEvent::Progress { percent: Some(60), .. })
    })
    .await;

    h.coordinator.cancel("abc").unwrap();
    // Late chunks must not matter.
    let _ = tx.unbounded_send(Ok(chunk(400, 7)));

    assert!(matches!(handle.wait().await, Err(PlaybackError::Canceled(_))));
    assert!(!h.cache.has("abc"));
    wait_for_download(&mut rx, |e| matches!(e, DownloadEvent::Canceled { .. })).await;
}

#[tokio::test]
async fn test_short_body_is_a_network_failure() {
    let (tx, response) = streamed_response(Some(1000), None);
    tx.unbounded_send(Ok(chunk(600, 0))).unwrap();
    drop(tx);
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());

    let err = h.coordinator.start(&episode()).unwrap().wait().await.unwrap_err();
    match err {
        PlaybackError::NetworkFailure(message) => assert!(message.contains("600 of 1000")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!h.cache.has("abc"));
}

#[tokio::test]
async fn test_upstream_status_fails_job() {
    let response = StreamingResponse {
        status: 404,
        headers: HashMap::new(),
        content_type: Some("text/html".into()),
        content_length: None,
        body: Box::pin(futures::stream::empty::<BridgeResult<Bytes>>()),
    };
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());

    let err = h.coordinator.start(&episode()).unwrap().wait().await.unwrap_err();
    assert!(matches!(err, PlaybackError::NetworkFailure(ref m) if m.contains("404")));
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn test_unknown_length_is_indeterminate() {
    let step = PROGRESS_BYTE_STEP as usize;
    let (tx, response) = streamed_response(None, None);
    tx.unbounded_send(Ok(chunk(300, 1))).unwrap();
    tx.unbounded_send(Ok(chunk(step - 300, 2))).unwrap();
    tx.unbounded_send(Ok(chunk(200, 3))).unwrap();
    drop(tx);
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());
    let mut rx = h.events.subscribe();

    let entry = h.coordinator.start(&episode()).unwrap().wait().await.unwrap();
    assert_eq!(entry.byte_length, PROGRESS_BYTE_STEP + 200);
    assert_eq!(entry.content_type, DEFAULT_CONTENT_TYPE);

    let received: Vec<(u64, Option<u8>)> = download_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress {
                received_bytes,
                percent,
                ..
            } => Some((received_bytes, percent)),
            _ => None,
        })
        .collect();
    // One report per step of bytes, then the final one at commit.
    assert_eq!(
        received,
        vec![
            (PROGRESS_BYTE_STEP, None),
            (PROGRESS_BYTE_STEP + 200, None)
        ]
    );
}

#[tokio::test]
async fn test_progress_reported_only_when_percent_moves() {
    let response = complete_response((0..200).map(|_| chunk(5, 4)).collect(), None);
    let h = harness(scripted(vec![Ok(response)]), DownloadConfig::default());
    let mut rx = h.events.subscribe();

    h.coordinator.start(&episode()).unwrap().wait().await.unwrap();

    let percents: Vec<u8> = download_events(&mut rx)
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { percent, .. } => *percent,
            _ => None,
        })
        .collect();
    // Two chunks per percent: half the chunks stay quiet.
    let expected: Vec<u8> = (1..=100).collect();
    assert_eq!(percents, expected);
}

#[tokio::test]
async fn test_user_agent_and_timeout_are_sent() {
    let mut http = MockHttp::new();
    http.expect_stream()
        .withf(|request: &HttpRequest| {
            request.headers.get("User-Agent").map(String::as_str) == Some("TestAgent/1.0")
                && request.timeout == Some(Duration::from_secs(30))
                && request.url == "http://x/a.mp3"
        })
        .times(1)
        .returning(|_| Ok(complete_response(vec![chunk(10, 0)], None)));
    let h = harness(http, DownloadConfig::new().with_user_agent("TestAgent/1.0"));

    h.coordinator.start(&episode()).unwrap().wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stalled_body_times_out() {
    let response = StreamingResponse {
        status: 200,
        headers: HashMap::new(),
        content_type: None,
        content_length: Some(100),
        body: Box::pin(futures::stream::pending::<BridgeResult<Bytes>>()),
    };
    let h = harness(
        scripted(vec![Ok(response)]),
        DownloadConfig::new().with_download_timeout(Duration::from_secs(300)),
    );

    let err = h.coordinator.start(&episode()).unwrap().wait().await.unwrap_err();
    assert!(matches!(err, PlaybackError::Timeout(d) if d == Duration::from_secs(300)));
    assert!(!h.cache.has("abc"));
}

/// Upstream that never answers.
struct SilentUpstream;

#[async_trait]
impl HttpClient for SilentUpstream {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        futures::future::pending().await
    }

    async fn stream(&self, _request: HttpRequest) -> BridgeResult<StreamingResponse> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_hits_fetch_timeout() {
    let h = harness(
        SilentUpstream,
        DownloadConfig::new().with_fetch_timeout(Duration::from_secs(30)),
    );

    let err = h.coordinator.start(&episode()).unwrap().wait().await.unwrap_err();
    assert!(matches!(err, PlaybackError::Timeout(d) if d == Duration::from_secs(30)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_different_guids_download_in_parallel() {
    let (tx_a, a) = streamed_response(Some(4), None);
    let (tx_b, b) = streamed_response(Some(4), None);
    let h = harness(scripted(vec![Ok(a), Ok(b)]), DownloadConfig::default());

    let first = h.coordinator.start(&episode()).unwrap();
    let second = h
        .coordinator
        .start(&EpisodeDescriptor::new("def", "http://x/d.mp3"))
        .unwrap();
    assert_eq!(
        h.coordinator.active_downloads(),
        vec!["abc".to_string(), "def".to_string()]
    );

    // Finish the second one first.
    tx_b.unbounded_send(Ok(chunk(4, 2))).unwrap();
    drop(tx_b);
    second.wait().await.unwrap();
    assert!(h.cache.has("def"));
    assert!(!h.cache.has("abc"));

    tx_a.unbounded_send(Ok(chunk(4, 1))).unwrap();
    drop(tx_a);
    first.wait().await.unwrap();
    assert!(h.cache.has("abc"));
}
