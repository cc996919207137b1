//! Cache and download configuration

use std::time::Duration;

/// Configuration for the offline cache store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Best-effort capacity in bytes; `None` leaves the cache unbounded.
    ///
    /// There is no eviction. A put that would cross the limit is rejected.
    pub max_cache_bytes: Option<u64>,

    /// Recompute the SHA-256 of a payload on every read (default: true)
    pub verify_integrity: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: None,
            verify_integrity: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = Some(bytes);
        self
    }

    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_bytes == Some(0) {
            return Err("max_cache_bytes must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

/// Configuration for the download coordinator.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Bound for the upstream to answer with headers (default: 30s)
    pub fetch_timeout: Duration,

    /// Bound for the whole transfer, body included (default: 300s)
    pub download_timeout: Duration,

    /// Downloads of different episodes running at once (default: 3)
    pub max_concurrent_downloads: usize,

    /// `User-Agent` sent upstream
    pub user_agent: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            max_concurrent_downloads: 3,
            user_agent: None,
        }
    }
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }
        if self.fetch_timeout.is_zero() || self.download_timeout.is_zero() {
            return Err("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}
