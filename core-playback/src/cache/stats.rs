//! Cache statistics and download progress

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Statistics about the offline cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of committed entries
    pub entries: usize,

    /// Total payload bytes across entries
    pub total_bytes: u64,

    /// Reads that found a complete entry
    pub hits: u64,

    /// Reads that found nothing
    pub misses: u64,

    /// Reads that failed integrity verification
    pub corrupt_reads: u64,

    /// Timestamp when stats were calculated (Unix seconds)
    pub calculated_at: i64,
}

impl CacheStats {
    /// Calculate cache usage as a percentage of max size.
    pub fn usage_percentage(&self, max_size: u64) -> f64 {
        if max_size == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / max_size as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self, max_size: u64) -> bool {
        self.usage_percentage(max_size) > 90.0
    }

    /// Bytes still available under `max_size`.
    pub fn remaining(&self, max_size: u64) -> u64 {
        max_size.saturating_sub(self.total_bytes)
    }

    /// Returns average bytes per entry.
    pub fn average_entry_size(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries as u64
        }
    }

    /// Share of reads that were served from the cache, in percent.
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }

        (self.hits as f64 / reads as f64) * 100.0
    }

    /// Summarize these numbers against an optional capacity.
    pub fn usage(&self, max_size: Option<u64>) -> CacheUsage {
        CacheUsage {
            entries: self.entries,
            total_bytes: self.total_bytes,
            average_entry_bytes: self.average_entry_size(),
            hit_rate: self.hit_rate(),
            max_bytes: max_size,
            remaining_bytes: max_size.map(|max| self.remaining(max)),
            usage_percentage: max_size.map(|max| self.usage_percentage(max)),
            near_capacity: max_size.is_some_and(|max| self.is_near_capacity(max)),
        }
    }
}

/// Storage report for settings screens.
///
/// Capacity fields are `None` when the cache is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheUsage {
    pub entries: usize,
    pub total_bytes: u64,
    pub average_entry_bytes: u64,
    /// Percent of reads served from the cache
    pub hit_rate: f64,
    pub max_bytes: Option<u64>,
    pub remaining_bytes: Option<u64>,
    pub usage_percentage: Option<f64>,
    pub near_capacity: bool,
}

/// `floor(received * 100 / total)`, clamped to 100.
pub fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (received as u128 * 100) / total as u128;
    percent.min(100) as u8
}

/// Byte interval between progress reports when the total is unknown.
pub const PROGRESS_BYTE_STEP: u64 = 64 * 1024;

/// Download progress information for one episode.
///
/// `percent` never decreases and stays at most 99 until
/// [`DownloadProgress::mark_committed`] is called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Episode identifier
    pub guid: String,

    /// Declared size in bytes, if the upstream sent one
    pub total_bytes: Option<u64>,

    /// Bytes received so far
    pub received_bytes: u64,

    /// Progress percentage; `None` while the total is unknown
    pub percent: Option<u8>,

    /// Current download speed in bytes/second
    pub speed_bytes_per_sec: u64,

    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,

    /// Download started timestamp (Unix millis)
    pub started_at: i64,

    /// Last update timestamp (Unix millis)
    pub updated_at: i64,

    #[serde(skip, default = "Instant::now")]
    started: Instant,

    #[serde(skip)]
    reported_bytes: u64,
}

impl DownloadProgress {
    /// Create new download progress tracker.
    pub fn new(guid: impl Into<String>, total_bytes: Option<u64>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();

        Self {
            guid: guid.into(),
            total_bytes,
            received_bytes: 0,
            percent: total_bytes.map(|_| 0),
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            started_at: now,
            updated_at: now,
            started: Instant::now(),
            reported_bytes: 0,
        }
    }

    /// Record the running byte count after a chunk.
    ///
    /// Returns `true` when the change is worth reporting: the percentage
    /// moved, or, with no declared total, another
    /// [`PROGRESS_BYTE_STEP`] bytes arrived since the last report.
    pub fn update(&mut self, received_bytes: u64) -> bool {
        self.received_bytes = received_bytes;
        self.updated_at = chrono::Utc::now().timestamp_millis();

        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.speed_bytes_per_sec = (received_bytes as f64 / elapsed) as u64;
        }

        let previous = self.percent;
        if let Some(total) = self.total_bytes {
            let next = percent_of(received_bytes, total).min(99);
            self.percent = Some(previous.unwrap_or(0).max(next));

            self.eta_seconds = if self.speed_bytes_per_sec > 0 {
                Some(total.saturating_sub(received_bytes) / self.speed_bytes_per_sec)
            } else {
                None
            };
        }

        let report = match self.total_bytes {
            Some(_) => previous != self.percent,
            None => received_bytes.saturating_sub(self.reported_bytes) >= PROGRESS_BYTE_STEP,
        };
        if report {
            self.reported_bytes = received_bytes;
        }
        report
    }

    /// The payload is durable; report completion.
    pub fn mark_committed(&mut self) {
        if self.total_bytes.is_some() {
            self.percent = Some(100);
        }
        self.eta_seconds = Some(0);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Returns true once every declared byte has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.total_bytes, Some(total) if self.received_bytes >= total)
    }

    /// Format speed as human-readable string.
    pub fn speed_string(&self) -> String {
        format_bytes_per_sec(self.speed_bytes_per_sec)
    }

    /// Format ETA as human-readable string.
    pub fn eta_string(&self) -> String {
        match self.eta_seconds {
            Some(secs) => format_duration_seconds(secs),
            None => "calculating...".to_string(),
        }
    }
}

fn format_bytes_per_sec(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B/s", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB/s", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB/s", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_duration_seconds(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_calculations() {
        let stats = CacheStats {
            entries: 4,
            total_bytes: 400_000_000,
            hits: 30,
            misses: 10,
            corrupt_reads: 0,
            calculated_at: 0,
        };

        assert_eq!(stats.average_entry_size(), 100_000_000);
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(stats.remaining(500_000_000), 100_000_000);
        assert_eq!(stats.remaining(100), 0);
        assert!(stats.is_near_capacity(420_000_000));
        assert!(!stats.is_near_capacity(1_000_000_000));
    }

    #[test]
    fn test_usage_report() {
        let stats = CacheStats {
            entries: 2,
            total_bytes: 950,
            hits: 1,
            misses: 1,
            corrupt_reads: 0,
            calculated_at: 0,
        };

        let bounded = stats.usage(Some(1000));
        assert_eq!(bounded.average_entry_bytes, 475);
        assert_eq!(bounded.hit_rate, 50.0);
        assert_eq!(bounded.remaining_bytes, Some(50));
        assert_eq!(bounded.usage_percentage, Some(95.0));
        assert!(bounded.near_capacity);

        let unbounded = stats.usage(None);
        assert_eq!(unbounded.max_bytes, None);
        assert_eq!(unbounded.remaining_bytes, None);
        assert_eq!(unbounded.usage_percentage, None);
        assert!(!unbounded.near_capacity);
    }

    #[test]
    fn test_percent_of_floors() {
        assert_eq!(percent_of(500, 1000), 50);
        assert_eq!(percent_of(599, 1000), 59);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2000, 1000), 100);
        assert_eq!(percent_of(10, 0), 0);
    }

    #[test]
    fn test_progress_caps_until_commit() {
        let mut progress = DownloadProgress::new("abc", Some(1000));
        assert_eq!(progress.percent, Some(0));

        assert!(progress.update(500));
        assert_eq!(progress.percent, Some(50));

        progress.update(1000);
        assert_eq!(progress.percent, Some(99));
        assert!(progress.is_complete());

        progress.mark_committed();
        assert_eq!(progress.percent, Some(100));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut progress = DownloadProgress::new("abc", Some(1000));
        progress.update(600);
        assert!(!progress.update(300));
        assert_eq!(progress.percent, Some(60));
    }

    #[test]
    fn test_unchanged_percent_is_not_reported() {
        let mut progress = DownloadProgress::new("abc", Some(100_000));
        assert!(progress.update(1_000));
        assert!(!progress.update(1_500));
        assert!(!progress.update(1_999));
        assert!(progress.update(2_000));
        assert_eq!(progress.received_bytes, 2_000);
    }

    #[test]
    fn test_unknown_total_is_indeterminate() {
        let mut progress = DownloadProgress::new("abc", None);
        assert_eq!(progress.percent, None);

        assert!(!progress.update(4096));
        assert_eq!(progress.percent, None);
        assert_eq!(progress.received_bytes, 4096);

        assert!(progress.update(PROGRESS_BYTE_STEP));
        assert!(!progress.update(PROGRESS_BYTE_STEP + 4096));
        assert!(progress.update(2 * PROGRESS_BYTE_STEP));
        assert!(!progress.is_complete());
        assert_eq!(progress.eta_string(), "calculating...");
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes_per_sec(500), "500 B/s");
        assert_eq!(format_bytes_per_sec(1024), "1.0 KB/s");
        assert_eq!(format_bytes_per_sec(1024 * 1024), "1.0 MB/s");

        assert_eq!(format_duration_seconds(30), "30s");
        assert_eq!(format_duration_seconds(90), "1m 30s");
        assert_eq!(format_duration_seconds(3661), "1h 1m");
    }
}
