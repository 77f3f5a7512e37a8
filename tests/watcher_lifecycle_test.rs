//! Step watcher lifecycle tests
//!
//! Drives a watcher against a record being appended to, including a
//! concurrent writer thread and real timer expiry.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fitlog_reader::clock::ManualClock;
use fitlog_reader::config::WatcherConfig;
use fitlog_reader::record::{Record, LOSS_LOG, META_LOG, METRIC_LOG};
use fitlog_reader::{StepLog, StepWatcher, WatcherState};
use tempfile::TempDir;

fn record_dir(root: &TempDir) -> PathBuf {
    let dir = root.path().join("log_20240101_000000");
    fs::create_dir(&dir).expect("mkdir");
    fs::write(dir.join(META_LOG), "{\"meta\": {\"state\": \"running\"}}\n").expect("meta");
    fs::write(dir.join(LOSS_LOG), "").expect("loss");
    fs::write(dir.join(METRIC_LOG), "").expect("metric");
    dir
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).expect("open");
    file.write_all(text.as_bytes()).expect("write");
    file.flush().expect("flush");
}

#[test]
fn test_fragment_then_completion_yields_one_entry() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    let watcher = StepWatcher::with_clock(
        &dir,
        "fragment",
        WatcherConfig::default(),
        Arc::new(ManualClock::new()),
    );

    append(&dir.join(LOSS_LOG), "Step:10\t{\"step\": 10, \"loss\": {\"ce\"");
    let first = watcher.poll().expect("poll");
    assert!(first.is_empty());
    assert!(!first.is_finished());

    append(&dir.join(LOSS_LOG), ": 0.25}}\nStep:11\t{\"step\"");
    let second = watcher.poll().expect("poll");
    assert_eq!(second.loss().len(), 1);
    assert_eq!(second.loss()[0].step(), 10);
    assert_eq!(second.loss()[0].get("loss"), Some(&serde_json::json!({"ce": 0.25})));

    append(&dir.join(LOSS_LOG), ": 11}\n");
    let third = watcher.poll().expect("poll");
    assert_eq!(third.loss().len(), 1);
    assert_eq!(third.loss()[0].step(), 11);
}

#[test]
fn test_corrupt_step_line_skipped() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    append(
        &dir.join(METRIC_LOG),
        "Step:1\t{\"step\": 1}\nStep:2\t{broken\nStep:3\t{\"step\": 3}\n",
    );
    let watcher = StepWatcher::with_clock(
        &dir,
        "corrupt",
        WatcherConfig::default(),
        Arc::new(ManualClock::new()),
    );
    let update = watcher.poll().expect("poll");
    let steps: Vec<i64> = update.entries(StepLog::Metric).iter().map(|e| e.step()).collect();
    assert_eq!(steps, vec![1, 3]);
}

#[test]
fn test_quiescence_closes_for_good() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    let watcher = StepWatcher::with_clock(
        &dir,
        "quiet",
        WatcherConfig::default().max_idle_polls(4),
        Arc::new(ManualClock::new()),
    );

    for _ in 0..3 {
        assert!(!watcher.poll().expect("poll").is_finished());
    }
    assert!(watcher.poll().expect("poll").is_finished());
    assert_eq!(watcher.state(), WatcherState::Finished);

    append(&dir.join(LOSS_LOG), "Step:1\t{\"step\": 1}\n");
    for _ in 0..3 {
        let update = watcher.poll().expect("poll");
        assert!(update.is_finished());
        assert!(update.is_empty());
    }
}

#[test]
fn test_concurrent_writer() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    let loss = dir.join(LOSS_LOG);

    let writer = thread::spawn(move || {
        for step in 0..200_i32 {
            let line = format!("Step:{step}\t{{\"step\": {step}, \"loss\": {}}}\n", 1.0 / f64::from(step + 1));
            // split each line across two writes to exercise reassembly
            let (head, tail) = line.split_at(line.len() / 2);
            append(&loss, head);
            append(&loss, tail);
        }
    });

    let watcher = StepWatcher::with_clock(
        &dir,
        "concurrent",
        WatcherConfig::default().max_idle_polls(1_000),
        Arc::new(ManualClock::new()),
    );
    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(20);
    while seen.len() < 200 && Instant::now() < deadline {
        let update = watcher.poll().expect("poll");
        seen.extend(update.loss().iter().map(|e| e.step()));
        thread::sleep(Duration::from_millis(1));
    }
    writer.join().expect("writer");
    seen.extend(watcher.poll().expect("poll").loss().iter().map(|e| e.step()));

    assert_eq!(seen, (0..200).collect::<Vec<i64>>());
    watcher.stop().expect("stop");
}

#[test]
fn test_timer_finishes_unpolled_watcher() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    let config = WatcherConfig::default()
        .wait_window(Duration::from_millis(50))
        .tick_interval(Duration::from_millis(10));
    let watcher = StepWatcher::new(&dir, "timer", config);
    watcher.poll().expect("poll");

    let deadline = Instant::now() + Duration::from_secs(10);
    while watcher.state() != WatcherState::Finished && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(watcher.state(), WatcherState::Finished);
    assert!(watcher.poll().expect("poll").is_finished());
    watcher.stop().expect("stop after timer exit");
}

#[test]
fn test_stop_from_another_thread() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    let watcher = Arc::new(StepWatcher::new(
        &dir,
        "remote-stop",
        WatcherConfig::default().tick_interval(Duration::from_millis(20)),
    ));
    watcher.poll().expect("poll");

    let remote = Arc::clone(&watcher);
    let stopper = thread::spawn(move || remote.stop());
    let local = watcher.stop();
    stopper.join().expect("join").expect("remote stop");
    local.expect("local stop");
    assert_eq!(watcher.state(), WatcherState::Finished);
}

#[test]
fn test_one_shot_for_finished_record() {
    let root = TempDir::new().expect("tempdir");
    let dir = record_dir(&root);
    append(&dir.join(META_LOG), "{\"meta\": {\"state\": \"finish\"}}\n");
    append(&dir.join(METRIC_LOG), "Step:2\t{\"step\": 2}\nStep:1\t{\"step\": 1}\n");

    let record = Record::from_dir(&dir).expect("record");
    assert!(record.is_finished().expect("meta readable"));
    assert!(record.has_step_entries());

    let watcher = StepWatcher::new(record.dir(), "once", WatcherConfig::default());
    let update = watcher.poll_once().expect("poll once");
    assert!(update.is_finished());
    let steps: Vec<i64> = update.metric().iter().map(|e| e.step()).collect();
    assert_eq!(steps, vec![1, 2]);
    assert_eq!(watcher.state(), WatcherState::Finished);
}
