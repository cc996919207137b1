//! # Download Coordinator
//!
//! Fetches whole episodes for offline playback.
//!
//! Each guid moves through `NotStarted -> Active -> {Committed | Failed |
//! Canceled}`. At most one job per guid runs at a time; jobs for different
//! guids run concurrently up to `max_concurrent_downloads`.
//!
//! The body is read chunk by chunk and kept in memory. Only a complete body
//! is handed to [`OfflineCacheStore::put_unless_canceled`]; on failure,
//! timeout or cancellation the received bytes are dropped and the cache is
//! left untouched.

use bridge_traits::{HttpClient, HttpRequest};
use bytes::{Bytes, BytesMut};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, DownloadConfig, DownloadProgress, OfflineCacheStore};
use crate::error::{PlaybackError, Result};
use crate::types::EpisodeDescriptor;

/// Content type recorded when the upstream declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upper bound for the up-front buffer reservation.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Phase of a running job. Finished jobs are reported through
/// [`DownloadHandle::wait`] and the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Active,
    Committing,
}

struct Job {
    token: CancellationToken,
    state: JobState,
    progress: DownloadProgress,
}

/// Handle to one accepted download.
pub struct DownloadHandle {
    guid: String,
    token: CancellationToken,
    outcome: oneshot::Receiver<Result<CacheEntry>>,
}

impl DownloadHandle {
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Request cancellation. The outcome becomes `Canceled` unless the
    /// payload was already committed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<CacheEntry> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(PlaybackError::Internal(format!(
                "Download task for {} ended without reporting",
                self.guid
            ))),
        }
    }
}

struct CoordinatorInner {
    http: Arc<dyn HttpClient>,
    cache: Arc<OfflineCacheStore>,
    config: DownloadConfig,
    semaphore: Arc<Semaphore>,
    jobs: Mutex<HashMap<String, Job>>,
    events: EventBus,
}

/// Runs offline downloads into an [`OfflineCacheStore`].
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl DownloadCoordinator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: Arc<OfflineCacheStore>,
        config: DownloadConfig,
        events: EventBus,
    ) -> Self {
        let permits = config.max_concurrent_downloads.max(1);
        Self {
            inner: Arc::new(CoordinatorInner {
                http,
                cache,
                config,
                semaphore: Arc::new(Semaphore::new(permits)),
                jobs: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Begin downloading `episode`.
    ///
    /// Rejected with `AlreadyDownloading` while a job for the guid runs and
    /// with `AlreadyExists` once the episode is cached. Must be called from
    /// within a Tokio runtime.
    #[instrument(skip(self, episode), fields(guid = %episode.guid))]
    pub fn start(&self, episode: &EpisodeDescriptor) -> Result<DownloadHandle> {
        let guid = episode.guid.clone();
        let token = CancellationToken::new();

        {
            let mut jobs = self.inner.jobs.lock();
            if jobs.contains_key(&guid) {
                return Err(PlaybackError::AlreadyDownloading(guid));
            }
            if self.inner.cache.has(&guid) {
                return Err(PlaybackError::AlreadyExists(guid));
            }
            jobs.insert(
                guid.clone(),
                Job {
                    token: token.clone(),
                    state: JobState::Active,
                    progress: DownloadProgress::new(guid.clone(), None),
                },
            );
        }
        info!("Starting download for {}", guid);

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task_episode = episode.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            let outcome = inner.run(&task_episode, &task_token).await;
            inner.finish(&task_episode.guid, &outcome);
            let _ = tx.send(outcome);
        });

        Ok(DownloadHandle {
            guid,
            token,
            outcome: rx,
        })
    }

    /// Cancel the running job for `guid`. `NotFound` if none runs.
    pub fn cancel(&self, guid: &str) -> Result<()> {
        let jobs = self.inner.jobs.lock();
        let job = jobs
            .get(guid)
            .ok_or_else(|| PlaybackError::NotFound(guid.to_string()))?;
        job.token.cancel();
        debug!("Cancellation requested for {}", guid);
        Ok(())
    }

    pub fn progress(&self, guid: &str) -> Option<DownloadProgress> {
        self.inner.jobs.lock().get(guid).map(|j| j.progress.clone())
    }

    pub fn job_state(&self, guid: &str) -> Option<JobState> {
        self.inner.jobs.lock().get(guid).map(|j| j.state)
    }

    pub fn is_downloading(&self, guid: &str) -> bool {
        self.inner.jobs.lock().contains_key(guid)
    }

    /// Guids with a running job, sorted.
    pub fn active_downloads(&self) -> Vec<String> {
        let mut guids: Vec<String> = self.inner.jobs.lock().keys().cloned().collect();
        guids.sort();
        guids
    }

    /// Cancel every running job.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.inner.jobs.lock();
        for job in jobs.values() {
            job.token.cancel();
        }
        jobs.len()
    }
}

impl CoordinatorInner {
    async fn run(
        &self,
        episode: &EpisodeDescriptor,
        token: &CancellationToken,
    ) -> Result<CacheEntry> {
        let guid = episode.guid.as_str();
        let url = episode.network_locator.as_str();
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PlaybackError::Canceled(guid.to_string())),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| PlaybackError::Internal("Download semaphore closed".to_string()))?,
        };

        let limit = self.config.download_timeout;
        let (payload, content_type) = match timeout(limit, self.fetch(guid, url, token)).await {
            Ok(fetched) => fetched?,
            Err(_) => {
                warn!("Download of {} timed out after {:?}", guid, limit);
                return Err(PlaybackError::Timeout(limit));
            }
        };

        self.update_job(guid, |job| job.state = JobState::Committing);
        let entry = self
            .cache
            .put_unless_canceled(episode, &content_type, payload, token)
            .await?;

        if let Some(progress) = self.update_job(guid, |job| job.progress.mark_committed()) {
            self.emit_progress(&progress);
        }
        Ok(entry)
    }

    #[instrument(skip(self, token))]
    async fn fetch(
        &self,
        guid: &str,
        url: &str,
        token: &CancellationToken,
    ) -> Result<(Bytes, String)> {
        let fetch_timeout = self.config.fetch_timeout;
        let mut request = HttpRequest::get(url).timeout(fetch_timeout);
        if let Some(agent) = &self.config.user_agent {
            request = request.user_agent(agent.clone());
        }

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PlaybackError::Canceled(guid.to_string())),
            opened = timeout(fetch_timeout, self.http.stream(request)) => opened,
        };
        let response = match opened {
            Ok(response) => response.map_err(PlaybackError::network)?,
            Err(_) => return Err(PlaybackError::Timeout(fetch_timeout)),
        };

        if !response.is_success() {
            return Err(PlaybackError::NetworkFailure(format!(
                "Upstream returned status {}",
                response.status
            )));
        }

        let total = response.content_length;
        let content_type = response
            .content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        self.update_job(guid, |job| {
            job.progress = DownloadProgress::new(guid.to_string(), total)
        });
        debug!(total = ?total, content_type = %content_type, "Upstream answered");
        self.emit(DownloadEvent::Started {
            guid: guid.to_string(),
            total_bytes: total,
        });

        let mut body = response.body;
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOCATION) as usize);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PlaybackError::Canceled(guid.to_string())),
                chunk = body.next() => chunk,
            };

            match chunk {
                None => break,
                Some(Err(e)) => return Err(PlaybackError::network(e)),
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    let received = buffer.len() as u64;
                    let mut changed = false;
                    let progress = self.update_job(guid, |job| {
                        changed = job.progress.update(received);
                    });
                    if let Some(progress) = progress.filter(|_| changed) {
                        self.emit_progress(&progress);
                    }
                }
            }
        }

        let received = buffer.len() as u64;
        if let Some(total) = total {
            if received < total {
                return Err(PlaybackError::NetworkFailure(format!(
                    "Body ended after {} of {} bytes",
                    received, total
                )));
            }
        }

        debug!(received, "Body complete");
        Ok((buffer.freeze(), content_type))
    }

    /// Apply `f` to the job and return its progress afterwards.
    fn update_job<F>(&self, guid: &str, f: F) -> Option<DownloadProgress>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(guid)?;
        f(job);
        Some(job.progress.clone())
    }

    fn finish(&self, guid: &str, outcome: &Result<CacheEntry>) {
        self.jobs.lock().remove(guid);

        let event = match outcome {
            Ok(entry) => {
                info!("Download of {} committed ({} bytes)", guid, entry.byte_length);
                DownloadEvent::Committed {
                    guid: guid.to_string(),
                    byte_length: entry.byte_length,
                }
            }
            Err(PlaybackError::Canceled(_)) => {
                info!("Download of {} canceled", guid);
                DownloadEvent::Canceled {
                    guid: guid.to_string(),
                }
            }
            Err(e) => {
                warn!("Download of {} failed: {}", guid, e);
                DownloadEvent::Failed {
                    guid: guid.to_string(),
                    message: e.to_string(),
                    retryable: e.is_transient(),
                }
            }
        };
        self.emit(event);
    }

    fn emit_progress(&self, progress: &DownloadProgress) {
        self.emit(DownloadEvent::Progress {
            guid: progress.guid.clone(),
            received_bytes: progress.received_bytes,
            total_bytes: progress.total_bytes,
            percent: progress.percent,
        });
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.emit(CoreEvent::Download(event));
    }
}
