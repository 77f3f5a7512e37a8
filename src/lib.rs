//! # fitlog-reader: Incremental Reader for Experiment Logs
//!
//! **Version**: 0.1.0
//!
//! fitlog-reader ingests the append-only text logs written by experiment
//! tracking runs and exposes their accumulated state as merged in-memory
//! snapshots, without re-reading data it has already consumed.
//!
//! ## Components
//!
//! - [`merge`]: recursive fold of nested JSON objects with configurable precedence
//! - [`snapshot`]: per-record incremental reader driven by file cursors
//! - [`scanner`]: batch reads over every record under a log root
//! - [`watcher`]: background tailing of step-tagged `loss.log`/`metric.log` entries
//! - [`registry`]: concurrent map of live watchers
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Muda elimination**: unchanged files are skipped on modification time
//! - **Poka-Yoke safety**: cursors only advance after a whole record reads cleanly
//! - **Jidoka**: watcher lifecycle violations stop the line with a fatal error
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use fitlog_reader::config::ReaderConfig;
//! use fitlog_reader::scanner::RecordScanner;
//!
//! let mut scanner = RecordScanner::new("logs", ReaderConfig::default())?;
//!
//! // Only records with new content are returned
//! for record in scanner.scan(&HashSet::new())? {
//!     println!("{}: {}", record.id(), record.to_flat_json());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod line;
pub mod merge;
pub mod record;
pub mod registry;
pub mod scanner;
pub mod snapshot;
pub mod watcher;

pub use error::{Error, Result};
pub use line::StepEntry;
pub use merge::{merge, Snapshot};
pub use record::Record;
pub use scanner::{RecordScanner, RecordSnapshot};
pub use snapshot::{ReadOutcome, SnapshotReader};
pub use watcher::{StepLog, StepUpdate, StepWatcher, WatcherState};
