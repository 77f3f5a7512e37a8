//! Step watcher: background tailing of a record's event-stream logs
//!
//! ## Lifecycle
//!
//! ```text
//! Init ──poll──> Polling ──(wait window | idle polls | stop)──> Finished
//!   └──────────────poll_once / stop──────────────────────────────┘
//! ```
//!
//! - `Init`: nothing opened; the first poll opens `metric.log` and
//!   `loss.log` and starts the timer thread
//! - `Polling`: each poll returns the step entries completed since the last
//!   one, sorted by step within each file
//! - `Finished`: handles closed once; every later poll reports completion
//!
//! The timer thread waits on a condition variable with a coarse tick and
//! finishes the watcher when no poll arrived within the wait window. The
//! caller and the thread share state only through one mutex.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config::WatcherConfig;
use crate::line::{parse_step_line, StepEntry};
use crate::record::{LOSS_LOG, METRIC_LOG};
use crate::{Error, Result};

/// Watcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatcherState {
    /// No file opened yet
    Init,
    /// Handles open, timer running
    Polling,
    /// Handles closed; terminal
    Finished,
}

/// The two event-stream logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StepLog {
    /// `metric.log`
    Metric,
    /// `loss.log`
    Loss,
}

impl StepLog {
    /// Both logs, in read order.
    pub const ALL: [Self; 2] = [Self::Metric, Self::Loss];

    /// File name inside the record directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Metric => METRIC_LOG,
            Self::Loss => LOSS_LOG,
        }
    }
}

/// Entries returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepUpdate {
    metric: Vec<StepEntry>,
    loss: Vec<StepEntry>,
    finished: bool,
}

impl StepUpdate {
    fn completion() -> Self {
        Self {
            finished: true,
            ..Self::default()
        }
    }

    /// Entries read from one log, ascending by step.
    #[must_use]
    pub fn entries(&self, log: StepLog) -> &[StepEntry] {
        match log {
            StepLog::Metric => &self.metric,
            StepLog::Loss => &self.loss,
        }
    }

    fn entries_mut(&mut self, log: StepLog) -> &mut Vec<StepEntry> {
        match log {
            StepLog::Metric => &mut self.metric,
            StepLog::Loss => &mut self.loss,
        }
    }

    /// Entries from `metric.log`.
    #[must_use]
    pub fn metric(&self) -> &[StepEntry] {
        &self.metric
    }

    /// Entries from `loss.log`.
    #[must_use]
    pub fn loss(&self) -> &[StepEntry] {
        &self.loss
    }

    /// Whether the watcher is done; no further entries will come.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total entries across both logs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metric.len() + self.loss.len()
    }

    /// Whether the poll produced no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metric.is_empty() && self.loss.is_empty()
    }

    fn sort(&mut self) {
        self.metric.sort_by_key(StepEntry::step);
        self.loss.sort_by_key(StepEntry::step);
    }
}

/// Open handle on one event-stream log plus its unfinished line.
#[derive(Debug)]
struct StepStream {
    log: StepLog,
    path: PathBuf,
    file: File,
    unfinished: Vec<u8>,
    lines_seen: usize,
}

impl StepStream {
    /// Read whatever has been appended and collect completed step lines.
    fn read_available(&mut self, sink: &mut Vec<StepEntry>) -> Result<()> {
        let mut fresh = Vec::new();
        self.file
            .read_to_end(&mut fresh)
            .map_err(|e| Error::io(&self.path, e))?;
        if fresh.is_empty() {
            return Ok(());
        }

        let mut data = std::mem::take(&mut self.unfinished);
        data.extend_from_slice(&fresh);

        let mut start = 0;
        while let Some(pos) = data[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            self.collect_line(&data[start..end], sink);
            start = end + 1;
        }
        self.unfinished = data.split_off(start);
        Ok(())
    }

    fn collect_line(&mut self, raw: &[u8], sink: &mut Vec<StepEntry>) {
        let index = self.lines_seen;
        self.lines_seen += 1;

        let parsed = match std::str::from_utf8(raw) {
            Ok(line) => parse_step_line(line),
            Err(e) => Some(Err(e.to_string())),
        };
        match parsed {
            None => {}
            Some(Ok(entry)) => sink.push(entry),
            Some(Err(reason)) => {
                let err = Error::MalformedLine {
                    path: self.path.clone(),
                    line: index,
                    reason,
                };
                tracing::warn!(error = %err, "skipping corrupted step line");
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: WatcherState,
    streams: Vec<StepStream>,
    last_access: Option<Instant>,
    idle_polls: u32,
    stop_requested: bool,
    timer_running: bool,
}

struct Shared {
    id: String,
    dir: PathBuf,
    config: WatcherConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, Inner>,
        timeout: std::time::Duration,
    ) -> MutexGuard<'a, Inner> {
        self.cv
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    /// Open any event-stream log not opened yet. Missing files are retried
    /// on the next poll.
    fn open_streams(&self, inner: &mut Inner) -> Result<()> {
        for log in StepLog::ALL {
            if inner.streams.iter().any(|s| s.log == log) {
                continue;
            }
            let path = self.dir.join(log.file_name());
            match File::open(&path) {
                Ok(file) => inner.streams.push(StepStream {
                    log,
                    path,
                    file,
                    unfinished: Vec::new(),
                    lines_seen: 0,
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(watcher = %self.id, file = log.file_name(), "step log not created yet");
                }
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        Ok(())
    }

    fn read_streams(&self, inner: &mut Inner) -> Result<StepUpdate> {
        self.open_streams(inner)?;
        let mut update = StepUpdate::default();
        for stream in &mut inner.streams {
            stream.read_available(update.entries_mut(stream.log))?;
        }
        update.sort();
        Ok(update)
    }

    /// Why the watcher should finish now, if it should.
    fn expiry(&self, inner: &Inner) -> Option<&'static str> {
        if inner.stop_requested {
            return Some("stop requested");
        }
        if inner.idle_polls >= self.config.max_idle_polls {
            return Some("no new entries");
        }
        let last = inner.last_access?;
        let idle = self.clock.now().saturating_duration_since(last);
        (idle >= self.config.wait_window).then_some("wait window elapsed")
    }

    /// Close every handle and enter `Finished`. Idempotent.
    fn finish(&self, inner: &mut Inner, reason: &str) {
        if inner.state != WatcherState::Finished {
            for stream in &inner.streams {
                if !stream.unfinished.is_empty() {
                    tracing::warn!(
                        watcher = %self.id,
                        file = %stream.path.display(),
                        bytes = stream.unfinished.len(),
                        "closing with an unterminated line"
                    );
                }
            }
            inner.streams.clear();
            inner.state = WatcherState::Finished;
            tracing::info!(
                watcher = %self.id,
                record = %self.dir.display(),
                reason,
                "step updates finished"
            );
        }
        self.cv.notify_all();
    }

    fn run_timer(&self) {
        let mut inner = self.lock();
        while inner.state != WatcherState::Finished {
            if let Some(reason) = self.expiry(&inner) {
                self.finish(&mut inner, reason);
                break;
            }
            inner = self.wait(inner, self.config.tick_interval);
        }
        inner.timer_running = false;
        self.cv.notify_all();
    }
}

/// Background poller bound to one record.
pub struct StepWatcher {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StepWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWatcher")
            .field("id", &self.shared.id)
            .field("dir", &self.shared.dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StepWatcher {
    /// Create a watcher over the record directory `dir`.
    ///
    /// Nothing is opened until the first poll.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, id: impl Into<String>, config: WatcherConfig) -> Self {
        Self::with_clock(dir, id, config, Arc::new(SystemClock))
    }

    /// Create a watcher with a custom time source.
    #[must_use]
    pub fn with_clock(
        dir: impl Into<PathBuf>,
        id: impl Into<String>,
        config: WatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                dir: dir.into(),
                config,
                clock,
                inner: Mutex::new(Inner {
                    state: WatcherState::Init,
                    streams: Vec::new(),
                    last_access: None,
                    idle_polls: 0,
                    stop_requested: false,
                    timer_running: false,
                }),
                cv: Condvar::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Caller-chosen watcher id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Watched record directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        self.shared.lock().state
    }

    /// Consecutive polls that yielded no entry.
    #[must_use]
    pub fn idle_polls(&self) -> u32 {
        self.shared.lock().idle_polls
    }

    /// Read newly completed step entries.
    ///
    /// The first call opens the logs and starts the timer thread. Once the
    /// watcher is finished every call returns an empty, finished update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a log cannot be opened or read, or if the
    /// timer thread cannot be spawned.
    pub fn poll(&self) -> Result<StepUpdate> {
        let mut inner = self.shared.lock();
        if inner.state == WatcherState::Finished {
            return Ok(StepUpdate::completion());
        }

        inner.last_access = Some(self.shared.clock.now());
        let mut update = self.shared.read_streams(&mut inner)?;

        if update.is_empty() {
            inner.idle_polls = inner.idle_polls.saturating_add(1);
        } else {
            inner.idle_polls = 0;
        }
        if inner.idle_polls >= self.shared.config.max_idle_polls {
            self.shared.finish(&mut inner, "no new entries");
            update.finished = true;
            return Ok(update);
        }

        if inner.state == WatcherState::Init {
            inner.state = WatcherState::Polling;
            if !inner.timer_running {
                inner.timer_running = true;
                let shared = Arc::clone(&self.shared);
                let spawned = std::thread::Builder::new()
                    .name(format!("step-watcher-{}", self.shared.id))
                    .spawn(move || shared.run_timer());
                match spawned {
                    Ok(handle) => {
                        drop(inner);
                        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                    }
                    Err(e) => {
                        inner.timer_running = false;
                        return Err(Error::io(&self.shared.dir, e));
                    }
                }
            }
        }
        Ok(update)
    }

    /// Read once and finish, without starting the timer.
    ///
    /// For records already known to be complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a log cannot be opened or read; the watcher
    /// is finished either way.
    pub fn poll_once(&self) -> Result<StepUpdate> {
        let mut inner = self.shared.lock();
        if inner.state == WatcherState::Finished {
            return Ok(StepUpdate::completion());
        }
        inner.last_access = Some(self.shared.clock.now());
        let read = self.shared.read_streams(&mut inner);
        self.shared.finish(&mut inner, "single read");
        let mut update = read?;
        update.finished = true;
        Ok(update)
    }

    /// Evaluate the finish conditions once and return the resulting state.
    ///
    /// The timer thread does this every tick; calling it directly lets a
    /// driven clock take effect immediately.
    pub fn tick(&self) -> WatcherState {
        let mut inner = self.shared.lock();
        if inner.state == WatcherState::Polling {
            if let Some(reason) = self.shared.expiry(&inner) {
                self.shared.finish(&mut inner, reason);
            }
        }
        inner.state
    }

    /// Stop the watcher and wait for the timer thread to settle.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyViolation`] if the timer thread is still
    /// running after the configured bounded wait, or if it panicked.
    pub fn stop(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            inner.stop_requested = true;
            self.shared.finish(&mut inner, "stop requested");

            let mut attempts = 0;
            while inner.timer_running {
                if attempts >= self.shared.config.stop_attempts {
                    return Err(Error::ConcurrencyViolation(format!(
                        "watcher `{}` timer still running after {attempts} checks",
                        self.shared.id
                    )));
                }
                inner = self
                    .shared
                    .wait(inner, self.shared.config.stop_retry_interval);
                attempts += 1;
            }
        }

        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                Error::ConcurrencyViolation(format!(
                    "watcher `{}` timer thread panicked",
                    self.shared.id
                ))
            })?;
        }
        Ok(())
    }
}

impl Drop for StepWatcher {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.stop_requested = true;
            self.shared.cv.notify_all();
        }
        let handle = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
