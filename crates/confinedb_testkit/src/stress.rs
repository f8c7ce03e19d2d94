//! Stress tests for ConfineDB.
//!
//! These drive many OS threads through the open/commit/close cycle
//! against one store and check the bookkeeping afterwards.

use confinedb_core::{queue, Configuration, Database, Runtime, ThreadToken};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one stress run against a store.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// The store the run targeted.
    pub store: PathBuf,
    /// OS threads that took part.
    pub threads: usize,
    /// Commits, cycles or catch-ups that went through.
    pub completed: usize,
    /// Those that were refused or timed out.
    pub rejected: usize,
    /// Store version once the run settled, when a handle was left to read it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_version: Option<u64>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Completed plus rejected, per second.
    pub per_second: f64,
}

impl StressTestResult {
    /// Creates a result for a run on `store`.
    pub fn new(
        store: &Path,
        threads: usize,
        completed: usize,
        rejected: usize,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let per_second = if secs > 0.0 {
            (completed + rejected) as f64 / secs
        } else {
            0.0
        };

        Self {
            store: store.to_path_buf(),
            threads,
            completed,
            rejected,
            final_version: None,
            elapsed,
            per_second,
        }
    }

    /// Records the version the store reached.
    #[must_use]
    pub fn with_final_version(mut self, version: u64) -> Self {
        self.final_version = Some(version);
        self
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} on {} ===", self.store.display());
        println!("Threads: {}", self.threads);
        println!("Completed: {}, rejected: {}", self.completed, self.rejected);
        if let Some(version) = self.final_version {
            println!("Store version after run: {version}");
        }
        println!("Elapsed: {:?} ({:.2}/sec)", self.elapsed, self.per_second);
    }

    /// Renders the result as JSON, for collecting runs across builds.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            value_size: 256,
            key_count: 100,
        }
    }
}

fn key(i: usize, key_count: usize) -> Vec<u8> {
    format!("key-{:05}", i % key_count.max(1)).into_bytes()
}

/// Run a sequential commit stress test on one handle.
pub fn stress_sequential_commits(
    db: &Database,
    me: ThreadToken,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = key(i, config.key_count);
        match db.write(me, |db| db.put(me, &key, &value)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    let version = db.version(me).expect("Failed to read version");
    StressTestResult::new(db.path(), 1, successful, failed, start.elapsed())
        .with_final_version(version)
}

/// Run a transaction cancel stress test: every other transaction fails.
pub fn stress_transaction_aborts(
    db: &Database,
    me: ThreadToken,
    config: &StressConfig,
) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = key(i, config.key_count);
        let should_fail = i % 2 == 0;

        let result = db.write(me, |db| {
            db.put(me, &key, &value)?;
            if should_fail {
                Err(confinedb_core::CoreError::invalid_state(
                    db.path(),
                    "intentional",
                ))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    let version = db.version(me).expect("Failed to read version");
    StressTestResult::new(db.path(), 1, successful, failed, start.elapsed())
        .with_final_version(version)
}

/// Run concurrent commits from `config.threads` OS threads, each with its
/// own handle on `store`.
///
/// The calling thread holds a handle for the duration so in-memory stores
/// survive between workers.
pub fn stress_concurrent_commits(
    runtime: &Runtime,
    store: &Configuration,
    config: &StressConfig,
) -> StressTestResult {
    let main = ThreadToken::current();
    let anchor = runtime.open(main, store).expect("Failed to open store");
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads));

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let runtime = runtime.clone();
            let store = store.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);
            let config = config.clone();

            thread::spawn(move || {
                let me = ThreadToken::current();
                let db = runtime.open(me, &store).expect("Failed to open store");
                let value = vec![t as u8; config.value_size];
                barrier.wait();

                for i in 0..config.operations {
                    let key = key(t * config.operations + i, config.key_count);
                    match db.write(me, |db| db.put(me, &key, &value)) {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                db.close(me).expect("Failed to close store");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    let elapsed = start.elapsed();

    anchor.refresh(main).expect("Failed to refresh");
    let committed = successful.load(Ordering::Relaxed);
    let version = anchor.version(main).expect("Failed to read version");
    assert_eq!(
        version, committed as u64,
        "every successful commit should bump the version once"
    );
    anchor.close(main).expect("Failed to close store");

    StressTestResult::new(
        store.path(),
        config.threads,
        committed,
        failed.load(Ordering::Relaxed),
        elapsed,
    )
    .with_final_version(version)
}

/// Run open/close churn from `config.threads` OS threads.
///
/// Each thread opens the store a few times, closes it the same number of
/// times, then closes once more. The registry must end up empty.
pub fn stress_open_close_churn(
    runtime: &Runtime,
    store: &Configuration,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let runtime = runtime.clone();
            let store = store.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let rounds = config.operations;

            thread::spawn(move || {
                let me = ThreadToken::current();
                for round in 0..rounds {
                    let depth = 1 + round % 3;
                    let opened: Vec<Database> = (0..depth)
                        .filter_map(|_| runtime.open(me, &store).ok())
                        .collect();
                    if opened.len() != depth {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    for db in &opened {
                        if db.close(me).is_err() {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    match opened.first().map(|db| db.close(me)) {
                        Some(Ok(outcome)) if !outcome.was_last_instance() => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(runtime.registry().open_count(store.path()), 0);

    StressTestResult::new(
        store.path(),
        config.threads,
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run one writer against `config.threads` reader threads with queues.
///
/// Each reader pumps notices until its handle reaches the final version.
/// A successful op is a reader that caught up; a failed one timed out.
pub fn stress_notification_delivery(
    runtime: &Runtime,
    store: &Configuration,
    config: &StressConfig,
) -> StressTestResult {
    let commits = config.operations as u64;
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads + 1));

    let start = Instant::now();

    let readers: Vec<_> = (0..config.threads)
        .map(|_| {
            let runtime = runtime.clone();
            let store = store.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let me = ThreadToken::current();
                let (queue, receiver) = queue::channel();
                runtime.attach_queue(me, queue);
                let db = runtime.open(me, &store).expect("Failed to open store");
                barrier.wait();

                let caught_up = loop {
                    if db.version(me).expect("Failed to read version") >= commits {
                        break true;
                    }
                    match receiver.recv_timeout(Duration::from_secs(10)) {
                        Some(notice) => {
                            runtime
                                .deliver(me, receiver.id(), &notice)
                                .expect("Failed to deliver notice");
                        }
                        None => break false,
                    }
                };
                let counter = if caught_up { &successful } else { &failed };
                counter.fetch_add(1, Ordering::Relaxed);

                db.close(me).expect("Failed to close store");
                runtime.detach_queue(me);
            })
        })
        .collect();

    let me = ThreadToken::current();
    let db = runtime.open(me, store).expect("Failed to open store");
    barrier.wait();
    for i in 0..config.operations {
        let key = key(i, config.key_count);
        db.write(me, |db| db.put(me, &key, b"tick"))
            .expect("Failed to commit");
    }

    for reader in readers {
        reader.join().expect("Thread panicked");
    }
    let version = db.version(me).expect("Failed to read version");
    db.close(me).expect("Failed to close store");

    StressTestResult::new(
        store.path(),
        config.threads,
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
    .with_final_version(version)
}
