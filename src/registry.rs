//! Registry of live step watchers, keyed by a caller-chosen id.
//!
//! A dashboard typically holds one watcher per open chart; this map lets
//! request handlers on different threads find, poll and stop them.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::config::WatcherConfig;
use crate::watcher::{StepUpdate, StepWatcher, WatcherState};
use crate::Result;

/// Concurrent map of step watchers.
///
/// Uses `DashMap` internally; handles are cloned out before polling so no
/// shard lock is held across file reads.
///
/// # Example
///
/// ```rust,no_run
/// use fitlog_reader::config::WatcherConfig;
/// use fitlog_reader::registry::WatcherRegistry;
///
/// # fn example() -> fitlog_reader::Result<()> {
/// let registry = WatcherRegistry::new(WatcherConfig::default());
/// registry.watch("chart-1", "logs/log_20240101_120000");
/// if let Some(update) = registry.poll("chart-1")? {
///     println!("{} new entries", update.len());
/// }
/// registry.stop("chart-1")?;
/// # Ok(())
/// # }
/// ```
pub struct WatcherRegistry {
    watchers: DashMap<String, Arc<StepWatcher>>,
    config: WatcherConfig,
    clock: Arc<dyn Clock>,
}

impl WatcherRegistry {
    /// Create an empty registry; new watchers use `config`.
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty registry whose watchers share `clock`.
    #[must_use]
    pub fn with_clock(config: WatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            watchers: DashMap::new(),
            config,
            clock,
        }
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Check if no watcher is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Watcher for `id`, creating it over `dir` if absent.
    pub fn watch(&self, id: &str, dir: impl Into<PathBuf>) -> Arc<StepWatcher> {
        let watcher = self.watchers.entry(id.to_string()).or_insert_with(|| {
            Arc::new(StepWatcher::with_clock(
                dir,
                id,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(watcher.value())
    }

    /// Registered watcher for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<StepWatcher>> {
        self.watchers.get(id).map(|w| Arc::clone(w.value()))
    }

    /// Poll the watcher for `id`; `None` if no such watcher.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StepWatcher::poll`].
    pub fn poll(&self, id: &str) -> Result<Option<StepUpdate>> {
        match self.get(id) {
            Some(watcher) => watcher.poll().map(Some),
            None => Ok(None),
        }
    }

    /// Remove and stop the watcher for `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StepWatcher::stop`].
    pub fn stop(&self, id: &str) -> Result<bool> {
        match self.watchers.remove(id) {
            Some((_, watcher)) => watcher.stop().map(|()| true),
            None => Ok(false),
        }
    }

    /// Drop every finished watcher. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.watchers.len();
        self.watchers
            .retain(|_, watcher| watcher.state() != WatcherState::Finished);
        before.saturating_sub(self.watchers.len())
    }

    /// Stop and remove every watcher.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure; the remaining watchers are still
    /// stopped.
    pub fn stop_all(&self) -> Result<()> {
        let ids: Vec<String> = self.watchers.iter().map(|w| w.key().clone()).collect();
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.stop(&id) {
                tracing::warn!(watcher = %id, error = %e, "failed to stop watcher");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for WatcherRegistry {
    fn drop(&mut self) {
        let _ = self.stop_all();
    }
}
