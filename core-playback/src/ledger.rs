//! # Position Ledger
//!
//! Remembers where each episode was left off.
//!
//! The in-memory map answers every read. After each change the whole map is
//! written as one JSON snapshot to the host [`StateStore`], so a crash loses
//! at most one cadence interval of progress.
//!
//! While an episode plays, a cadence task owned by the ledger samples the
//! playback position every interval and records it. The task is canceled
//! when the episode or the transport status changes, and never outlives the
//! ledger.

use bridge_traits::StateStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{PlaybackError, Result};

/// State store key holding the snapshot.
pub const LEDGER_STATE_KEY: &str = "playback.positions";

/// Default interval between cadence writes.
pub const DEFAULT_CADENCE: Duration = Duration::from_secs(5);

struct Cadence {
    guid: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Durable `guid -> position` map with a scoped write cadence.
pub struct PositionLedger {
    positions: RwLock<HashMap<String, f64>>,
    store: Arc<dyn StateStore>,
    key: String,
    interval: Duration,
    cadence: Mutex<Option<Cadence>>,
    /// Serializes snapshot writes so the newest map always lands last.
    persist_lock: AsyncMutex<()>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn StateStore>, interval: Duration) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            store,
            key: LEDGER_STATE_KEY.to_string(),
            interval,
            cadence: Mutex::new(None),
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Use a different snapshot key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restore the snapshot written by an earlier process.
    ///
    /// Returns the number of positions loaded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let raw = self
            .store
            .get_string(&self.key)
            .await
            .map_err(PlaybackError::storage)?;

        let Some(raw) = raw else {
            debug!("No saved positions");
            return Ok(0);
        };

        let restored: HashMap<String, f64> = serde_json::from_str(&raw)?;
        let count = restored.len();
        {
            let mut positions = self.positions.write();
            for (guid, secs) in restored {
                positions.entry(guid).or_insert_with(|| sanitize(secs));
            }
        }

        info!("Restored {} playback positions", count);
        Ok(count)
    }

    /// Upsert the position for `guid`. Last write wins.
    ///
    /// Negative or non-finite input is stored as 0. The in-memory value is
    /// kept even when persisting fails.
    pub async fn record(&self, guid: &str, position_secs: f64) -> Result<()> {
        let position = sanitize(position_secs);
        let changed = {
            let mut positions = self.positions.write();
            positions.insert(guid.to_string(), position) != Some(position)
        };

        if !changed {
            return Ok(());
        }

        debug!(guid, position, "Recorded playback position");
        self.persist().await
    }

    /// Position to resume `guid` from; 0 when never recorded.
    pub fn recall(&self, guid: &str) -> f64 {
        self.positions.read().get(guid).copied().unwrap_or(0.0)
    }

    /// Drop the position for `guid`. Returns true if one existed.
    pub async fn forget(&self, guid: &str) -> Result<bool> {
        let removed = self.positions.write().remove(guid).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Every recorded position, sorted by guid.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .positions
            .read()
            .iter()
            .map(|(guid, secs)| (guid.clone(), *secs))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = {
            let positions = self.positions.read();
            serde_json::to_string(&*positions)?
        };

        self.store
            .set_string(&self.key, &snapshot)
            .await
            .map_err(|e| {
                warn!("Failed to persist playback positions: {}", e);
                PlaybackError::storage(e)
            })
    }

    /// Start recording `sample()` for `guid` every interval.
    ///
    /// Any running cadence is canceled first. The first write happens one
    /// full interval after this call. `sample` returning `None` skips that
    /// tick.
    pub fn start_cadence<F>(self: &Arc<Self>, guid: &str, sample: F)
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let ledger: Weak<Self> = Arc::downgrade(self);
        let task_guid = guid.to_string();
        let task_token = token.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(ledger) = ledger.upgrade() else { break };
                        let Some(position) = sample() else { continue };
                        if let Err(e) = ledger.record(&task_guid, position).await {
                            warn!(guid = %task_guid, "Cadence write failed: {}", e);
                        }
                    }
                }
            }
            debug!(guid = %task_guid, "Position cadence finished");
        });

        let previous = self.cadence.lock().replace(Cadence {
            guid: guid.to_string(),
            token,
            handle,
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        debug!(guid, interval_ms = period.as_millis() as u64, "Position cadence started");
    }

    /// Stop the running cadence, if any.
    pub fn halt_cadence(&self) {
        if let Some(cadence) = self.cadence.lock().take() {
            cadence.token.cancel();
            debug!(guid = %cadence.guid, "Position cadence halted");
        }
    }

    /// Guid the cadence is currently writing for.
    pub fn cadence_guid(&self) -> Option<String> {
        self.cadence.lock().as_ref().map(|c| c.guid.clone())
    }
}

impl Drop for PositionLedger {
    fn drop(&mut self) {
        if let Some(cadence) = self.cadence.get_mut().take() {
            cadence.token.cancel();
            cadence.handle.abort();
        }
    }
}

fn sanitize(position_secs: f64) -> f64 {
    if position_secs.is_finite() && position_secs > 0.0 {
        position_secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::MemoryStateStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::mock;
    use std::sync::atomic::{AtomicU64, Ordering};

    mock! {
        pub States {}

        #[async_trait]
        impl StateStore for States {
            async fn get_string(&self, key: &str) -> BridgeResult<Option<String>>;
            async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()>;
            async fn delete(&self, key: &str) -> BridgeResult<()>;
        }
    }

    fn ledger() -> (Arc<MemoryStateStore>, Arc<PositionLedger>) {
        let store = Arc::new(MemoryStateStore::new());
        let ledger = Arc::new(PositionLedger::new(store.clone(), DEFAULT_CADENCE));
        (store, ledger)
    }

    #[tokio::test]
    async fn test_record_and_recall() {
        let (_, ledger) = ledger();
        assert_eq!(ledger.recall("abc"), 0.0);

        ledger.record("abc", 42.5).await.unwrap();
        assert_eq!(ledger.recall("abc"), 42.5);

        ledger.record("abc", 10.0).await.unwrap();
        assert_eq!(ledger.recall("abc"), 10.0);

        ledger.record("abc", -3.0).await.unwrap();
        assert_eq!(ledger.recall("abc"), 0.0);

        ledger.record("abc", f64::NAN).await.unwrap();
        assert_eq!(ledger.recall("abc"), 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let (store, ledger) = ledger();
        ledger.record("abc", 12.0).await.unwrap();
        ledger.record("def", 30.0).await.unwrap();
        ledger.forget("def").await.unwrap();

        let reopened = PositionLedger::new(store, DEFAULT_CADENCE);
        assert_eq!(reopened.load().await.unwrap(), 1);
        assert_eq!(reopened.recall("abc"), 12.0);
        assert_eq!(reopened.recall("def"), 0.0);
        assert_eq!(reopened.entries(), vec![("abc".to_string(), 12.0)]);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_value() {
        let mut store = MockStates::new();
        store
            .expect_set_string()
            .returning(|_, _| Err(BridgeError::DatabaseError("disk full".into())));

        let ledger = PositionLedger::new(Arc::new(store), DEFAULT_CADENCE);
        let result = ledger.record("abc", 9.0).await;

        assert!(matches!(result, Err(PlaybackError::StorageFailure(_))));
        assert_eq!(ledger.recall("abc"), 9.0);
    }

    #[tokio::test]
    async fn test_unchanged_record_skips_write() {
        let mut store = MockStates::new();
        store.expect_set_string().times(1).returning(|_, _| Ok(()));

        let ledger = PositionLedger::new(Arc::new(store), DEFAULT_CADENCE);
        ledger.record("abc", 5.0).await.unwrap();
        ledger.record("abc", 5.0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_writes_every_interval() {
        let (_, ledger) = ledger();
        let clock = Arc::new(AtomicU64::new(0));
        let sample_clock = clock.clone();

        ledger.start_cadence("abc", move || {
            Some(sample_clock.load(Ordering::SeqCst) as f64)
        });

        clock.store(3, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ledger.recall("abc"), 0.0);

        clock.store(6, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ledger.recall("abc"), 6.0);

        ledger.halt_cadence();
        clock.store(20, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ledger.recall("abc"), 6.0);
        assert_eq!(ledger.cadence_guid(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_cadence_replaces_previous() {
        let (_, ledger) = ledger();

        ledger.start_cadence("first", || Some(1.0));
        ledger.start_cadence("second", || Some(2.0));
        assert_eq!(ledger.cadence_guid().as_deref(), Some("second"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ledger.recall("first"), 0.0);
        assert_eq!(ledger.recall("second"), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sample_skips_tick() {
        let (_, ledger) = ledger();
        ledger.start_cadence("abc", || None);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(ledger.entries().is_empty());
    }
}
