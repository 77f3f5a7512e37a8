//! Tail Records Example
//!
//! Scans a log root the way a dashboard refresh would, then tails the step
//! entries of every record that is still running.
//!
//! Run with: cargo run --example tail_records -- <log-root>

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use fitlog_reader::config::{ReaderConfig, WatcherConfig};
use fitlog_reader::registry::WatcherRegistry;
use fitlog_reader::scanner::RecordScanner;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let root = std::env::args().nth(1).unwrap_or_else(|| "logs".to_string());
    let mut scanner = RecordScanner::new(&root, ReaderConfig::default())
        .with_context(|| format!("cannot scan `{root}`"))?;

    // -------------------------------------------------------------------------
    // 1. One scan: every record with content
    // -------------------------------------------------------------------------
    let batch = scanner.scan(&HashSet::new())?;
    println!("=== {} record(s) under {root} ===", batch.len());
    for record in &batch {
        println!("{}", serde_json::to_string_pretty(&record.to_flat_json())?);
    }

    // -------------------------------------------------------------------------
    // 2. Tail running records until they go quiet
    // -------------------------------------------------------------------------
    let registry = WatcherRegistry::new(WatcherConfig::from_env());
    for record in scanner.records()? {
        if !record.has_step_entries() {
            continue;
        }
        let watcher = registry.watch(record.id(), record.dir());
        if record.is_finished()? {
            let update = watcher.poll_once()?;
            println!("{}: {} step entries (finished)", record.id(), update.len());
        }
    }
    registry.prune_finished();

    while !registry.is_empty() {
        for id in scanner.record_ids()? {
            if let Some(update) = registry.poll(&id)? {
                for entry in update.loss().iter().chain(update.metric()) {
                    println!("{id} step {}: {}", entry.step(), serde_json::to_string(entry.fields())?);
                }
            }
        }
        registry.prune_finished();
        std::thread::sleep(Duration::from_secs(1));
    }

    Ok(())
}
