//! Cross-crate integration test helpers.
//!
//! Scenario functions drive a [`TestCluster`] through one behavior and
//! assert on what the driver observed.

use crate::fixtures::TestCluster;
use shardtx_core::{CoreError, CoreResult, Session};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Counts how many times a transaction body ran.
#[derive(Debug, Clone, Default)]
pub struct AttemptCounter(Arc<AtomicU32>);

impl AttemptCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts recorded so far.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Returns a body that fails its first `failures` attempts with `error` and
/// then returns the attempt number.
pub fn failing_first<E>(
    failures: u32,
    error: E,
) -> (AttemptCounter, impl FnMut(&mut Session) -> CoreResult<u32>)
where
    E: Fn() -> CoreError,
{
    let counter = AttemptCounter::new();
    let attempts = counter.clone();
    let body = move |_: &mut Session| {
        let attempt = attempts.bump();
        if attempt <= failures {
            Err(error())
        } else {
            Ok(attempt)
        }
    };
    (counter, body)
}

/// Retry scenarios.
pub mod retries {
    use super::*;

    /// Runs a body that always fails with `error` and checks that exactly
    /// `max_attempts` attempts and `max_attempts - 1` sleeps happened.
    pub fn test_exhaustion<E>(cluster: &TestCluster, error: E) -> CoreError
    where
        E: Fn() -> CoreError,
    {
        let max_attempts = cluster.options().max_attempts;
        let (counter, body) = failing_first(u32::MAX, error);
        let err = cluster
            .transaction(body)
            .expect_err("Transaction should have failed");

        assert_eq!(counter.get(), max_attempts, "Attempt count mismatch");
        assert_eq!(
            cluster.sleeper.count(),
            max_attempts as usize - 1,
            "Sleep count mismatch"
        );
        err
    }

    /// Runs a body failing with a non-retryable `error` and checks that it
    /// ran once without sleeping.
    pub fn test_fails_fast<E>(cluster: &TestCluster, error: E) -> CoreError
    where
        E: Fn() -> CoreError,
    {
        let (counter, body) = failing_first(u32::MAX, error);
        let err = cluster
            .transaction(body)
            .expect_err("Transaction should have failed");

        assert_eq!(counter.get(), 1, "Non-retryable error was retried");
        assert_eq!(cluster.sleeper.count(), 0, "Non-retryable error slept");
        err
    }
}

/// Shard targeting scenarios.
pub mod targeting {
    use super::*;
    use shardtx_core::Shard;

    /// Targets `shard` with a body returning `outcome` and checks that the
    /// connection's target afterwards is what it was before.
    pub fn test_target_restored(cluster: &TestCluster, shard: &Shard, outcome: CoreResult<()>) {
        let fails = outcome.is_err();
        let mut outcome = Some(outcome);
        let result = cluster.no_retries().transaction(|session| {
            let before = current_target(session)?;
            let inside = session.target(shard, |s| {
                let inside = current_target(s)?;
                outcome.take().unwrap_or(Ok(())).map(|()| inside)
            });
            let after = current_target(session)?;
            assert_eq!(before, after, "Target was not restored");
            if let Ok(inside) = &inside {
                assert_eq!(inside, &shard.to_string(), "Target was not switched");
            }
            inside.map(|_| ())
        });
        assert_eq!(result.is_err(), fails, "Unexpected transaction outcome");
    }

    /// Reads the connection's target with a plain query.
    pub fn current_target(session: &mut Session) -> CoreResult<String> {
        session.use_connection(|connection| {
            let rows = connection.query("SHOW VITESS_TARGET")?;
            Ok(rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or_default())
        })
    }
}
