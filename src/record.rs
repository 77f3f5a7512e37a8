//! On-disk layout of one fitlog record
//!
//! ```text
//! <root>/
//!   log_20240101_123456/
//!     meta.log     (required)
//!     hyper.log
//!     metric.log   (plain updates + step lines)
//!     other.log
//!     loss.log     (plain updates + step lines)
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::line::{parse_update_line, ParsedLine, STEP_MARKER};
use crate::{Error, Result};

/// Required marker file; also carries run status.
pub const META_LOG: &str = "meta.log";
/// Hyper-parameters.
pub const HYPER_LOG: &str = "hyper.log";
/// Evaluation metrics (event stream).
pub const METRIC_LOG: &str = "metric.log";
/// Free-form extra values.
pub const OTHER_LOG: &str = "other.log";
/// Training loss (event stream).
pub const LOSS_LOG: &str = "loss.log";

/// Non-stepped files in priority order: earlier files win conflicting keys.
pub const SNAPSHOT_FILES: [&str; 4] = [META_LOG, HYPER_LOG, METRIC_LOG, OTHER_LOG];

/// Event-stream files tailed by the step watcher.
pub const STEP_FILES: [&str; 2] = [METRIC_LOG, LOSS_LOG];

/// Value of `meta.state` written when a run completes.
pub const FINISHED_STATE: &str = "finish";

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^log_\d+_\d+$").ok())
        .as_ref()
}

/// Whether `name` has the `log_<digits>_<digits>` shape.
#[must_use]
pub fn is_record_name(name: &str) -> bool {
    name_pattern().is_some_and(|pattern| pattern.is_match(name))
}

/// Whether `dir` is a valid record: a directory with a record-shaped name
/// that contains `meta.log`.
#[must_use]
pub fn is_record_dir(dir: &Path) -> bool {
    dir.is_dir()
        && dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_record_name)
        && dir.join(META_LOG).is_file()
}

/// A validated record directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: String,
    dir: PathBuf,
}

impl Record {
    /// Validate `dir` and wrap it; `None` when it is not a record.
    #[must_use]
    pub fn from_dir(dir: impl Into<PathBuf>) -> Option<Self> {
        let dir = dir.into();
        if !is_record_dir(&dir) {
            return None;
        }
        let id = dir.file_name()?.to_str()?.to_string();
        Some(Self { id, dir })
    }

    /// Record identifier (the directory name).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one log file inside the record.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether the writer marked the run finished.
    ///
    /// Looks at the last non-blank line of `meta.log` only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `meta.log` cannot be read.
    pub fn is_finished(&self) -> Result<bool> {
        let path = self.file(META_LOG);
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let mut last = None;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io(&path, e))?;
            if !line.trim().is_empty() {
                last = Some(line);
            }
        }
        let Some(last) = last else {
            return Ok(false);
        };
        let ParsedLine::Update(map) = parse_update_line(&last) else {
            return Ok(false);
        };
        let state = map
            .get("meta")
            .and_then(|meta| meta.get("state"))
            .and_then(Value::as_str);
        Ok(state == Some(FINISHED_STATE))
    }

    /// Whether either event-stream file holds a step line yet.
    ///
    /// Missing files are skipped; unreadable ones count as "no steps".
    #[must_use]
    pub fn has_step_entries(&self) -> bool {
        STEP_FILES.iter().any(|name| {
            let path = self.file(name);
            match file_has_line(&path, |line| line.starts_with(STEP_MARKER)) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to probe step file");
                    false
                }
            }
        })
    }

    /// Whether either event-stream file holds any non-blank line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if an existing file cannot be read.
    pub fn has_measurements(&self) -> Result<bool> {
        for name in STEP_FILES {
            if file_has_line(&self.file(name), |line| !line.trim().is_empty())? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Scan `path` for a line satisfying `pred`; a missing file yields `false`.
fn file_has_line(path: &Path, pred: impl Fn(&str) -> bool) -> Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io(path, e)),
    };
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if pred(&line) {
            return Ok(true);
        }
    }
    Ok(false)
}
