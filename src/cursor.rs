//! File cursors and per-record read state
//!
//! A [`FileCursor`] remembers how much of one file has been folded in. A
//! [`RecordState`] bundles the cursors of one record with the per-file
//! accumulators the snapshot is rebuilt from. A [`CursorTable`] keys those
//! states by record id for one scanner instance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::merge::{merge, Snapshot};
use crate::record::SNAPSHOT_FILES;

/// Read position within one log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCursor {
    line_offset: usize,
    modified: Option<DateTime<Utc>>,
}

impl FileCursor {
    /// Create a cursor at a known position.
    #[must_use]
    pub const fn new(line_offset: usize, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            line_offset,
            modified,
        }
    }

    /// Number of complete lines already folded into the snapshot.
    #[must_use]
    pub const fn line_offset(&self) -> usize {
        self.line_offset
    }

    /// Modification time observed at the last read, if any.
    #[must_use]
    pub const fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Whether a file with modification time `observed` needs no re-read.
    #[must_use]
    pub fn is_current(&self, observed: DateTime<Utc>) -> bool {
        self.modified == Some(observed)
    }

    /// Record a completed read.
    pub fn advance(&mut self, line_offset: usize, modified: DateTime<Utc>) {
        self.line_offset = line_offset;
        self.modified = Some(modified);
    }
}

/// Everything remembered about one record between reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordState {
    cursors: HashMap<String, FileCursor>,
    contents: HashMap<String, Snapshot>,
    snapshot: Snapshot,
}

impl RecordState {
    /// Create an empty state (nothing read yet).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor of one file, or the start-of-file cursor if never read.
    #[must_use]
    pub fn cursor(&self, file: &str) -> FileCursor {
        self.cursors.get(file).copied().unwrap_or_default()
    }

    /// Merged view of the record's non-stepped files.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Accumulated content of one file (later lines already applied).
    #[must_use]
    pub fn file_content(&self, file: &str) -> Option<&Snapshot> {
        self.contents.get(file)
    }

    /// Fold newly read lines of `file` and move its cursor.
    pub(crate) fn apply(
        &mut self,
        file: &str,
        update: Snapshot,
        line_offset: usize,
        modified: DateTime<Utc>,
    ) {
        merge(self.contents.entry(file.to_string()).or_default(), update, true);
        self.cursors
            .entry(file.to_string())
            .or_default()
            .advance(line_offset, modified);
    }

    /// Recompute the snapshot from the per-file accumulators.
    ///
    /// Files are folded in priority order without overwrite, so the first
    /// file holding a key decides its value.
    pub(crate) fn rebuild_snapshot(&mut self) {
        let mut snapshot = Snapshot::new();
        for file in SNAPSHOT_FILES {
            if let Some(content) = self.contents.get(file) {
                merge(&mut snapshot, content.clone(), false);
            }
        }
        self.snapshot = snapshot;
    }
}

/// Per-scanner table of record states, keyed by record id.
///
/// Not internally synchronized: it is owned by one scanner and mutated
/// through `&mut`.
#[derive(Debug, Default)]
pub struct CursorTable {
    records: FxHashMap<String, RecordState>,
}

impl CursorTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records with remembered state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been read yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// State of one record.
    #[must_use]
    pub fn get(&self, record_id: &str) -> Option<&RecordState> {
        self.records.get(record_id)
    }

    /// State of one record, created on first access.
    pub fn entry(&mut self, record_id: &str) -> &mut RecordState {
        self.records.entry(record_id.to_string()).or_default()
    }

    /// Forget one record; its next read starts from the beginning.
    pub fn remove(&mut self, record_id: &str) -> Option<RecordState> {
        self.records.remove(record_id)
    }

    /// Forget every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
