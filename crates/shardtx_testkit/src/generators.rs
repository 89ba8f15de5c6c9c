//! Property-based test generators using proptest.

use proptest::prelude::*;
use shardtx_core::{CoreError, TransacterOptions};
use shardtx_driver::{Check, CheckSet, DriverError, RecordId};
use std::time::Duration;

/// Strategy for keyspace names.
pub fn keyspace_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for a keyspace split evenly into 1 to 8 shards.
///
/// Produces `<keyspace>/<range>` names that cover the whole key space
/// without overlap, e.g. `ks/-40`, `ks/40-80`, `ks/80-c0`, `ks/c0-`.
pub fn shard_layout_strategy() -> impl Strategy<Value = Vec<String>> {
    (keyspace_strategy(), 1usize..=8)
        .prop_map(|(keyspace, count)| split_keyspace(&keyspace, count))
}

/// Splits a keyspace into `count` equal ranges.
pub fn split_keyspace(keyspace: &str, count: usize) -> Vec<String> {
    if count <= 1 {
        return vec![format!("{keyspace}/0")];
    }
    let bound = |i: usize| -> String {
        if i == 0 || i == count {
            String::new()
        } else {
            format!("{:02x}", i * 256 / count)
        }
    };
    (0..count)
        .map(|i| format!("{keyspace}/{}-{}", bound(i), bound(i + 1)))
        .collect()
}

/// Strategy for arbitrary check sets.
pub fn check_set_strategy() -> impl Strategy<Value = CheckSet> {
    prop::sample::subsequence(Check::ALL.to_vec(), 0..=Check::ALL.len())
        .prop_map(|checks| CheckSet::of(&checks))
}

/// Strategy for valid transacter options with small delays.
pub fn options_strategy() -> impl Strategy<Value = TransacterOptions> {
    (
        1u32..6,
        0u64..20,
        0u64..20,
        0u64..10,
        any::<bool>(),
        check_set_strategy(),
    )
        .prop_map(|(attempts, min, spread, jitter, read_only, checks)| {
            let mut options = TransacterOptions::new()
                .max_attempts(attempts)
                .retry_delay(
                    Duration::from_millis(min),
                    Duration::from_millis(min + spread),
                )
                .retry_jitter(Duration::from_millis(jitter))
                .read_only(read_only);
            options.disabled_checks = checks;
            options
        })
}

/// Kinds of failure a transaction may be retried after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableKind {
    /// A row vanished underneath the transaction.
    StaleObject,
    /// A row changed underneath the transaction.
    OptimisticLock,
    /// A row lock could not be acquired in time.
    LockTimeout,
    /// The connection failed in a recoverable way.
    Connection,
    /// The driver reported a closed connection.
    ConnectionClosed,
    /// Application code asked for a retry.
    Application,
}

impl RetryableKind {
    /// Builds an error of this kind.
    pub fn error(self) -> CoreError {
        let id = RecordId::new(1);
        match self {
            Self::StaleObject => DriverError::StaleObject {
                table: "customers".into(),
                id,
            }
            .into(),
            Self::OptimisticLock => DriverError::OptimisticLock {
                table: "customers".into(),
                id,
                expected: 0,
                actual: 1,
            }
            .into(),
            Self::LockTimeout => DriverError::LockTimeout("customers".into()).into(),
            Self::Connection => DriverError::recoverable("connection reset").into(),
            Self::ConnectionClosed => DriverError::sql("Connection is closed").into(),
            Self::Application => CoreError::retry("balance changed"),
        }
    }
}

/// Strategy for kinds of retryable failure.
pub fn retryable_kind_strategy() -> impl Strategy<Value = RetryableKind> {
    prop::sample::select(vec![
        RetryableKind::StaleObject,
        RetryableKind::OptimisticLock,
        RetryableKind::LockTimeout,
        RetryableKind::Connection,
        RetryableKind::ConnectionClosed,
        RetryableKind::Application,
    ])
}

/// Strategy for errors a transaction may be retried after.
pub fn retryable_error_strategy() -> impl Strategy<Value = CoreError> {
    retryable_kind_strategy().prop_map(RetryableKind::error)
}

/// Strategy for errors that must never be retried.
pub fn fatal_error_strategy() -> impl Strategy<Value = CoreError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(CoreError::illegal_state),
        "[a-z ]{1,20}".prop_map(CoreError::invalid_argument),
        "[a-z_]{1,20}".prop_map(|c| CoreError::from(DriverError::ConstraintViolation(c))),
        "syntax error [a-z ]{0,20}".prop_map(|m| CoreError::from(DriverError::sql(m))),
    ]
}
