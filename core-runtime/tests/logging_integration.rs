//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

// Global subscriber can only be installed once per process, so everything
// that depends on it lives in this one test.
#[test]
fn test_init_logging_mirrors_to_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("logging_integration=debug")
        .with_logger_sink(sink.clone());

    init_logging(config).expect("first init succeeds");

    tracing::debug!(guid = "abc", "below sink threshold");
    tracing::info!(guid = "abc", access_token = "xyz", "episode cached");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "episode cached");
        assert_eq!(entries[0].fields.get("guid"), Some(&"abc".to_string()));
        assert_eq!(
            entries[0].fields.get("access_token"),
            Some(&"[REDACTED]".to_string())
        );
    }

    let second = init_logging(LoggingConfig::default());
    assert!(second.is_err());
}

#[test]
fn test_invalid_filter_is_config_error() {
    let config = LoggingConfig::default().with_filter("core_playback=[");
    // Fails while building the filter, before touching the global subscriber.
    let err = init_logging(config).unwrap_err();
    assert!(err.to_string().contains("Invalid log filter"));
}

#[test]
fn test_redaction_leaves_episode_fields_alone() {
    assert_eq!(
        redact_if_sensitive("network_locator", "http://x/a.mp3"),
        "http://x/a.mp3"
    );
    assert_eq!(redact_if_sensitive("api_key", "k"), "[REDACTED]");
    assert_eq!(
        redact_if_sensitive("network_locator", "https://x/a.mp3?Signature=s"),
        "https://x/a.mp3?[REDACTED]"
    );
}
