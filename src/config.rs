//! Reader and watcher configuration
//!
//! Defaults match the behaviour expected by a dashboard refreshing every
//! few seconds: records with no measurements are hidden, and a step watcher
//! gives up after a minute without being polled.

use std::time::Duration;

/// Default wait window before an unpolled watcher finishes (60 seconds).
const DEFAULT_WAIT_WINDOW_SECS: u64 = 60;

/// Default number of consecutive empty polls before a watcher finishes.
const DEFAULT_MAX_IDLE_POLLS: u32 = 30;

/// Default background timer tick (500 ms).
const DEFAULT_TICK_INTERVAL_MS: u64 = 500;

/// Default number of checks a stop request makes before giving up.
const DEFAULT_STOP_ATTEMPTS: u32 = 4;

/// Default interval between stop checks (1 second).
const DEFAULT_STOP_RETRY_INTERVAL_SECS: u64 = 1;

/// Snapshot reader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Skip records whose `loss.log` and `metric.log` hold no non-blank line.
    ///
    /// Default: true.
    pub skip_empty_records: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderConfig {
    /// Creates a `ReaderConfig` with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            skip_empty_records: true,
        }
    }

    /// Set whether measurement-free records are skipped.
    #[must_use]
    pub const fn skip_empty_records(mut self, skip: bool) -> Self {
        self.skip_empty_records = skip;
        self
    }
}

/// Step watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Time without a poll call after which the watcher finishes.
    ///
    /// Default: 60 seconds. Configure via `FITLOG_WATCH_WAIT_SECS`.
    pub wait_window: Duration,

    /// Consecutive polls yielding no entries before the watcher finishes.
    ///
    /// Default: 30. Configure via `FITLOG_WATCH_MAX_IDLE_POLLS`.
    pub max_idle_polls: u32,

    /// Interval at which the background timer re-checks its conditions.
    ///
    /// Default: 500 ms.
    pub tick_interval: Duration,

    /// Checks a stop request makes for the background thread to settle.
    ///
    /// Default: 4.
    pub stop_attempts: u32,

    /// Wait between those checks.
    ///
    /// Default: 1 second.
    pub stop_retry_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherConfig {
    /// Creates a `WatcherConfig` with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wait_window: Duration::from_secs(DEFAULT_WAIT_WINDOW_SECS),
            max_idle_polls: DEFAULT_MAX_IDLE_POLLS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            stop_attempts: DEFAULT_STOP_ATTEMPTS,
            stop_retry_interval: Duration::from_secs(DEFAULT_STOP_RETRY_INTERVAL_SECS),
        }
    }

    /// Creates a `WatcherConfig` from environment variables.
    ///
    /// Reads `FITLOG_WATCH_WAIT_SECS` and `FITLOG_WATCH_MAX_IDLE_POLLS`.
    /// Missing or unparsable values use defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let wait_secs = std::env::var("FITLOG_WATCH_WAIT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_WAIT_WINDOW_SECS);
        let max_idle_polls = std::env::var("FITLOG_WATCH_MAX_IDLE_POLLS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_IDLE_POLLS);

        Self {
            wait_window: Duration::from_secs(wait_secs),
            max_idle_polls,
            ..Self::new()
        }
    }

    /// Set the wait window.
    #[must_use]
    pub const fn wait_window(mut self, wait_window: Duration) -> Self {
        self.wait_window = wait_window;
        self
    }

    /// Set the idle poll threshold.
    #[must_use]
    pub const fn max_idle_polls(mut self, polls: u32) -> Self {
        self.max_idle_polls = polls;
        self
    }

    /// Set the background tick interval.
    #[must_use]
    pub const fn tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    /// Set the bounded wait used by stop requests.
    #[must_use]
    pub const fn stop_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.stop_attempts = attempts;
        self.stop_retry_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.wait_window, Duration::from_secs(60));
        assert_eq!(config.max_idle_polls, 30);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert!(ReaderConfig::default().skip_empty_records);
    }

    #[test]
    fn test_setters() {
        let config = WatcherConfig::new()
            .wait_window(Duration::from_secs(5))
            .max_idle_polls(2)
            .tick_interval(Duration::from_millis(10))
            .stop_wait(2, Duration::from_millis(20));
        assert_eq!(config.wait_window, Duration::from_secs(5));
        assert_eq!(config.max_idle_polls, 2);
        assert_eq!(config.stop_attempts, 2);
        assert_eq!(config.stop_retry_interval, Duration::from_millis(20));

        assert!(!ReaderConfig::new().skip_empty_records(false).skip_empty_records);
    }

    // Env vars are process-wide; tests touching them take this lock.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_env<F: FnOnce()>(wait: &str, idle: &str, check: F) {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("FITLOG_WATCH_WAIT_SECS", wait);
        std::env::set_var("FITLOG_WATCH_MAX_IDLE_POLLS", idle);
        check();
        std::env::remove_var("FITLOG_WATCH_WAIT_SECS");
        std::env::remove_var("FITLOG_WATCH_MAX_IDLE_POLLS");
    }

    #[test]
    fn test_from_env_reads_overrides() {
        with_env("5", "7", || {
            let config = WatcherConfig::from_env();
            assert_eq!(config.wait_window, Duration::from_secs(5));
            assert_eq!(config.max_idle_polls, 7);
            assert_eq!(config.tick_interval, Duration::from_millis(500));
        });
    }

    #[test]
    fn test_from_env_invalid_values_fall_back() {
        with_env("soon", "-3", || {
            let config = WatcherConfig::from_env();
            assert_eq!(config.wait_window, Duration::from_secs(60));
            assert_eq!(config.max_idle_polls, 30);
        });
    }
}
