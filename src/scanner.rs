//! Record scanner: batch reads of every record under a log root
//!
//! A scanner owns its cursor table; several scanners over different (or
//! the same) roots never share state. Scans take `&mut self`, so callers
//! sharing one scanner across threads must wrap it in a lock.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::config::ReaderConfig;
use crate::cursor::CursorTable;
use crate::merge::Snapshot;
use crate::record::Record;
use crate::snapshot::{ReadOutcome, SnapshotReader};
use crate::{Error, Result};

/// Snapshot of one record, tagged with its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSnapshot {
    id: String,
    snapshot: Snapshot,
}

impl RecordSnapshot {
    /// Record id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Merged snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Snapshot with the id injected under `"id"`.
    #[must_use]
    pub fn to_flat_json(&self) -> Value {
        let mut flat = Snapshot::with_capacity(self.snapshot.len() + 1);
        flat.insert("id".to_string(), Value::String(self.id.clone()));
        for (key, value) in &self.snapshot {
            flat.insert(key.clone(), value.clone());
        }
        Value::Object(flat)
    }
}

/// Batch reader over a log root.
#[derive(Debug)]
pub struct RecordScanner {
    root: PathBuf,
    reader: SnapshotReader,
    table: CursorTable,
}

impl RecordScanner {
    /// Create a scanner over `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `root` is not a directory or holds no
    /// valid record.
    pub fn new(root: impl Into<PathBuf>, config: ReaderConfig) -> Result<Self> {
        let root = root.into();
        validate_root(&root)?;
        Ok(Self {
            root,
            reader: SnapshotReader::new(config),
            table: CursorTable::new(),
        })
    }

    /// Point the scanner at a new root, forgetting every cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] as for [`RecordScanner::new`]; the previous
    /// root and cursors are kept in that case.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        validate_root(&root)?;
        self.root = root;
        self.table.clear();
        Ok(())
    }

    /// Current log root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remembered per-record state.
    #[must_use]
    pub const fn table(&self) -> &CursorTable {
        &self.table
    }

    /// Valid records under the root, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the root cannot be listed.
    pub fn records(&self) -> Result<Vec<Record>> {
        list_records(&self.root)
    }

    /// Ids of the valid records under the root, ordered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the root cannot be listed.
    pub fn record_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| record.id().to_string())
            .collect())
    }

    /// Drop one record's cursors so its next scan re-reads everything.
    pub fn forget(&mut self, record_id: &str) -> bool {
        self.table.remove(record_id).is_some()
    }

    /// Read every valid record not in `ignore`.
    ///
    /// Returns the records whose snapshot changed and is non-empty. A
    /// record that fails to read is logged and left out; its cursors stay
    /// where they were so the next scan retries it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] only if the root itself cannot be listed.
    pub fn scan(&mut self, ignore: &HashSet<String>) -> Result<Vec<RecordSnapshot>> {
        let mut batch = Vec::new();
        for record in self.records()? {
            if ignore.contains(record.id()) {
                continue;
            }
            let state = self.table.entry(record.id());
            match self.reader.read(&record, state) {
                Ok(ReadOutcome::Updated) if !state.snapshot().is_empty() => {
                    batch.push(RecordSnapshot {
                        id: record.id().to_string(),
                        snapshot: state.snapshot().clone(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(record = record.id(), error = %e, "failed to read record");
                }
            }
        }
        tracing::debug!(root = %self.root.display(), updated = batch.len(), "scan complete");
        Ok(batch)
    }
}

fn list_records(root: &Path) -> Result<Vec<Record>> {
    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        if let Some(record) = Record::from_dir(entry.path()) {
            records.push(record);
        }
    }
    records.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(records)
}

fn validate_root(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "`{}` is not a valid directory",
            root.display()
        )));
    }
    let records = list_records(root).map_err(|e| Error::Config(e.to_string()))?;
    if records.is_empty() {
        return Err(Error::Config(format!(
            "`{}` has no valid logs",
            root.display()
        )));
    }
    Ok(())
}
