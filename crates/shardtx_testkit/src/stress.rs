//! Stress tests for shardtx.
//!
//! These tests run many transactions from several threads against one
//! record so that optimistic-lock conflicts and retries actually happen.

use crate::fixtures::TestCluster;
use shardtx_core::{CoreResult, Transacter, TransacterOptions};
use shardtx_driver::{Record, RecordId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const COUNTER_TABLE: &str = "counters";
const COUNTER_FIELD: &str = "value";

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// The record the threads contended on.
    pub counter: RecordId,
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that gave up.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions per thread.
    pub transactions_per_thread: usize,
    /// Attempts allowed per transaction.
    pub max_attempts: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 50,
            max_attempts: 1_000,
        }
    }
}

/// Creates the shared counter record.
pub fn create_counter(cluster: &TestCluster) -> RecordId {
    cluster
        .db
        .insert(Record::root(COUNTER_TABLE).with_field(COUNTER_FIELD, "0"))
}

/// Reads the committed value of a counter.
pub fn counter_value(cluster: &TestCluster, id: RecordId) -> u64 {
    cluster
        .db
        .record(COUNTER_TABLE, id)
        .and_then(|record| record.field(COUNTER_FIELD).and_then(|v| v.parse().ok()))
        .unwrap_or_default()
}

/// Increments one counter from several threads at once.
///
/// Every committed transaction adds exactly one, so the final value must
/// equal [`StressTestResult::committed`].
pub fn stress_concurrent_increments(
    cluster: &TestCluster,
    config: &StressConfig,
) -> StressTestResult {
    let id = create_counter(cluster);
    let transacter = cluster.transacter.with_options(
        TransacterOptions::new()
            .max_attempts(config.max_attempts)
            .retry_delay(Duration::ZERO, Duration::ZERO)
            .retry_jitter(Duration::ZERO),
    );
    let committed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let transacter = transacter.clone();
            let committed = Arc::clone(&committed);
            let failed = Arc::clone(&failed);
            let count = config.transactions_per_thread;
            thread::spawn(move || {
                for _ in 0..count {
                    match increment(&transacter, id) {
                        Ok(()) => committed.fetch_add(1, Ordering::SeqCst),
                        Err(_) => failed.fetch_add(1, Ordering::SeqCst),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult {
        counter: id,
        committed: committed.load(Ordering::SeqCst),
        failed: failed.load(Ordering::SeqCst),
        duration: start.elapsed(),
    }
}

fn increment(transacter: &Transacter, id: RecordId) -> CoreResult<()> {
    transacter.transaction(|session| {
        let mut record = session.load(COUNTER_TABLE, id)?;
        let value: u64 = record
            .field(COUNTER_FIELD)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        // Widen the window between read and commit.
        thread::yield_now();
        record.set(COUNTER_FIELD, (value + 1).to_string());
        session.update(&record)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let cluster = TestCluster::unsharded();
        let config = StressConfig {
            threads: 4,
            transactions_per_thread: 25,
            ..Default::default()
        };
        let result = stress_concurrent_increments(&cluster, &config);

        assert_eq!(result.failed, 0);
        assert_eq!(result.committed, 100);
        assert_eq!(counter_value(&cluster, result.counter), 100);
    }
}
