//! Test fixtures and cluster helpers.
//!
//! Provides pre-wired transacters over the in-memory driver and a sleeper
//! that records delays instead of waiting.

use parking_lot::Mutex;
use shardtx_core::{BackendType, DataSourceConfig, Sleeper, Transacter, TransacterOptions};
use shardtx_driver::InMemoryDatabase;
use std::sync::Arc;
use std::time::Duration;

/// A [`Sleeper`] that records requested delays and returns at once.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a sleeper with no recorded delays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Number of sleeps requested so far.
    pub fn count(&self) -> usize {
        self.delays.lock().len()
    }

    /// Forgets recorded delays.
    pub fn clear(&self) {
        self.delays.lock().clear();
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// An in-memory cluster with a transacter wired to it.
#[derive(Debug, Clone)]
pub struct TestCluster {
    /// The simulated database.
    pub db: InMemoryDatabase,
    /// Records the delays between attempts.
    pub sleeper: Arc<RecordingSleeper>,
    /// Transacter running against `db`.
    pub transacter: Transacter,
}

impl TestCluster {
    /// A single unsharded MySQL database.
    pub fn unsharded() -> Self {
        Self::build(InMemoryDatabase::new(), BackendType::MySql, fast_retries(2))
    }

    /// A Vitess cluster reporting the given `<keyspace>/<shard>` names.
    pub fn sharded<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(
            InMemoryDatabase::sharded(shards),
            BackendType::Vitess,
            fast_retries(2),
        )
    }

    /// Rebuilds the transacter with `options`, keeping the database.
    pub fn with_options(self, options: TransacterOptions) -> Self {
        let backend = self.transacter.data_source().backend;
        Self::build(self.db, backend, options)
    }

    fn build(db: InMemoryDatabase, backend: BackendType, options: TransacterOptions) -> Self {
        let sleeper = Arc::new(RecordingSleeper::new());
        let transacter = Transacter::builder(Arc::new(db.clone()))
            .data_source(DataSourceConfig::new("test", backend))
            .options(options)
            .sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>)
            .build()
            .expect("Invalid transacter options");
        Self {
            db,
            sleeper,
            transacter,
        }
    }
}

impl std::ops::Deref for TestCluster {
    type Target = Transacter;

    fn deref(&self) -> &Self::Target {
        &self.transacter
    }
}

/// Options with small retry delays and no jitter.
pub fn fast_retries(max_attempts: u32) -> TransacterOptions {
    TransacterOptions::new()
        .max_attempts(max_attempts)
        .retry_delay(Duration::from_millis(10), Duration::from_millis(20))
        .retry_jitter(Duration::ZERO)
}

/// Runs a test against a fresh unsharded cluster.
///
/// # Example
///
/// ```rust
/// use shardtx_testkit::with_cluster;
/// use shardtx_driver::Record;
///
/// with_cluster(|cluster| {
///     let id = cluster
///         .transaction(|session| session.save(&Record::root("customers")))
///         .unwrap();
///     assert!(cluster.db.record("customers", id).is_some());
/// });
/// ```
pub fn with_cluster<F, R>(f: F) -> R
where
    F: FnOnce(&TestCluster) -> R,
{
    f(&TestCluster::unsharded())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sleeper_does_not_sleep() {
        let sleeper = RecordingSleeper::new();
        let start = std::time::Instant::now();
        sleeper.sleep(Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(60)]);
        sleeper.clear();
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn clusters_pick_their_backend() {
        assert_eq!(
            TestCluster::unsharded().data_source().backend,
            BackendType::MySql
        );
        let cluster = TestCluster::sharded(["commerce/0"]).with_options(fast_retries(5));
        assert_eq!(cluster.data_source().backend, BackendType::Vitess);
        assert_eq!(cluster.options().max_attempts, 5);
    }
}
