//! Snapshot reader: incremental fold of a record's non-stepped files
//!
//! ## Algorithm
//!
//! For each file in priority order (`meta`, `hyper`, `metric`, `other`):
//!
//! 1. unchanged modification time: skip
//! 2. otherwise read the complete lines past the cursor, folding each JSON
//!    object into a file-local update (later lines win)
//! 3. fold the update into that file's accumulator and advance the cursor
//!
//! The record snapshot is then rebuilt with earlier files winning. Cursor
//! changes for a record are committed only when every file read succeeds.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::config::ReaderConfig;
use crate::cursor::RecordState;
use crate::line::{parse_update_line, ParsedLine};
use crate::merge::{merge, Snapshot};
use crate::record::{Record, SNAPSHOT_FILES};
use crate::{Error, Result};

/// Result of one record read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Record has no measurements yet and empty records are skipped
    Skipped,
    /// Nothing new; snapshot unchanged
    Unchanged,
    /// Snapshot changed
    Updated,
}

/// Lines read from one file past its cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineChunk {
    /// Fold of every update line read (later lines win)
    pub update: Snapshot,
    /// Total complete lines in the file, i.e. the new cursor offset
    pub line_count: usize,
    /// Lines skipped because they did not parse
    pub malformed: usize,
}

/// Read complete lines of `path` starting at line index `start_line`.
///
/// A trailing line without a newline is left for a later read and is not
/// counted. Step-tagged and blank lines are counted but carry no data.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be opened or read.
pub fn read_update_lines(path: &Path, start_line: usize) -> Result<LineChunk> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut chunk = LineChunk::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| Error::io(path, e))?;
        if n == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        let index = chunk.line_count;
        chunk.line_count += 1;
        if index < start_line {
            continue;
        }
        let parsed = match std::str::from_utf8(&buf) {
            Ok(line) => parse_update_line(line),
            Err(e) => ParsedLine::Malformed(e.to_string()),
        };
        match parsed {
            ParsedLine::Update(map) => merge(&mut chunk.update, map, true),
            ParsedLine::Malformed(reason) => {
                let err = Error::MalformedLine {
                    path: path.to_path_buf(),
                    line: index,
                    reason,
                };
                tracing::warn!(error = %err, "skipping corrupted line");
                chunk.malformed += 1;
            }
            ParsedLine::Blank | ParsedLine::Step => {}
        }
    }

    Ok(chunk)
}

/// Modification time of `path`, or `None` if it does not exist.
fn modified_time(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified().map_err(|e| Error::io(path, e))?;
            Ok(Some(DateTime::<Utc>::from(modified)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Incremental reader for one record at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotReader {
    config: ReaderConfig,
}

impl SnapshotReader {
    /// Create a reader.
    #[must_use]
    pub const fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Reader configuration.
    #[must_use]
    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Bring `state` up to date with `record`'s files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] with the failing path if any file cannot be
    /// read. `state` is left untouched in that case.
    pub fn read(&self, record: &Record, state: &mut RecordState) -> Result<ReadOutcome> {
        if self.config.skip_empty_records && !record.has_measurements()? {
            tracing::debug!(record = record.id(), "no measurements yet, skipping");
            return Ok(ReadOutcome::Skipped);
        }

        let mut pending = Vec::new();
        for name in SNAPSHOT_FILES {
            let path = record.file(name);
            let Some(modified) = modified_time(&path)? else {
                continue;
            };
            let cursor = state.cursor(name);
            if cursor.is_current(modified) {
                continue;
            }
            let chunk = read_update_lines(&path, cursor.line_offset())?;
            tracing::debug!(
                record = record.id(),
                file = name,
                from = cursor.line_offset(),
                to = chunk.line_count,
                "read new lines"
            );
            pending.push((name, chunk, modified));
        }

        if pending.is_empty() {
            return Ok(ReadOutcome::Unchanged);
        }

        let previous = state.snapshot().clone();
        for (name, chunk, modified) in pending {
            state.apply(name, chunk.update, chunk.line_count, modified);
        }
        state.rebuild_snapshot();

        if *state.snapshot() == previous {
            Ok(ReadOutcome::Unchanged)
        } else {
            Ok(ReadOutcome::Updated)
        }
    }
}
