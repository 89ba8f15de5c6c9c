//! Transacter and data source configuration.

use crate::error::{CoreError, CoreResult};
use shardtx_driver::{Check, CheckSet};
use std::fmt;
use std::time::Duration;

/// Options controlling how a [`Transacter`](crate::Transacter) runs
/// transactions.
///
/// Options are plain values: every setter returns a new value and leaves
/// the receiver untouched, so a derived transacter can never change the
/// options of the one it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransacterOptions {
    /// Total attempts per transaction, including the first one.
    pub max_attempts: u32,

    /// Checks suppressed for every session of the transacter.
    pub disabled_checks: CheckSet,

    /// Lower bound of the retry delay before jitter.
    pub min_retry_delay: Duration,

    /// Upper bound of the retry delay before jitter.
    pub max_retry_delay: Duration,

    /// Maximum random delay added on top of the backoff.
    pub retry_jitter: Duration,

    /// Whether sessions are read-only.
    pub read_only: bool,
}

impl Default for TransacterOptions {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            disabled_checks: CheckSet::empty(),
            min_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(400),
            read_only: false,
        }
    }
}

impl TransacterOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the retry delay bounds.
    #[must_use]
    pub const fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_retry_delay = min;
        self.max_retry_delay = max;
        self
    }

    /// Sets the retry jitter.
    #[must_use]
    pub const fn retry_jitter(mut self, jitter: Duration) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Sets whether sessions are read-only.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Suppresses a check for every session.
    #[must_use]
    pub const fn disable_check(mut self, check: Check) -> Self {
        self.disabled_checks = self.disabled_checks.with(check);
        self
    }

    /// Re-enables a previously suppressed check.
    #[must_use]
    pub const fn enable_check(mut self, check: Check) -> Self {
        self.disabled_checks = self.disabled_checks.without(check);
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `max_attempts` is zero or the minimum
    /// retry delay exceeds the maximum.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::invalid_argument(
                "max_attempts must be at least 1",
            ));
        }
        if self.min_retry_delay > self.max_retry_delay {
            return Err(CoreError::invalid_argument(format!(
                "min_retry_delay {:?} exceeds max_retry_delay {:?}",
                self.min_retry_delay, self.max_retry_delay
            )));
        }
        Ok(())
    }
}

/// Database product behind a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Vitess sharding proxy in front of MySQL.
    Vitess,
    /// MySQL.
    MySql,
    /// PostgreSQL.
    Postgresql,
    /// TiDB.
    TiDb,
    /// H2, for local development.
    H2,
}

impl BackendType {
    /// Returns true if the backend exposes shards.
    #[must_use]
    pub const fn is_sharded(self) -> bool {
        matches!(self, BackendType::Vitess)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Vitess => "vitess",
            BackendType::MySql => "mysql",
            BackendType::Postgresql => "postgresql",
            BackendType::TiDb => "tidb",
            BackendType::H2 => "h2",
        };
        f.write_str(name)
    }
}

/// Describes the data source a transacter runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceConfig {
    /// Name used to qualify log messages.
    pub name: String,

    /// Database product.
    pub backend: BackendType,
}

impl DataSourceConfig {
    /// Creates a data source configuration.
    pub fn new(name: impl Into<String>, backend: BackendType) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self::new("default", BackendType::MySql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = TransacterOptions::default();
        assert_eq!(options.max_attempts, 2);
        assert_eq!(options.min_retry_delay, Duration::from_millis(100));
        assert_eq!(options.max_retry_delay, Duration::from_millis(200));
        assert_eq!(options.retry_jitter, Duration::from_millis(400));
        assert!(!options.read_only);
        assert!(options.disabled_checks.is_empty());
        options.validate().unwrap();
    }

    #[test]
    fn builder_pattern() {
        let options = TransacterOptions::new()
            .max_attempts(5)
            .retry_delay(Duration::from_millis(10), Duration::from_millis(20))
            .retry_jitter(Duration::ZERO)
            .read_only(true)
            .disable_check(Check::Cowrite);

        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.max_retry_delay, Duration::from_millis(20));
        assert!(options.read_only);
        assert!(options.disabled_checks.contains(Check::Cowrite));
        assert!(!options.enable_check(Check::Cowrite).disabled_checks.contains(Check::Cowrite));
    }

    #[test]
    fn derived_options_leave_the_original_alone() {
        let original = TransacterOptions::new().disable_check(Check::TableScan);
        let derived = original.disable_check(Check::Cowrite).max_attempts(9);

        assert!(!original.disabled_checks.contains(Check::Cowrite));
        assert_eq!(original.max_attempts, 2);
        assert!(derived.disabled_checks.contains(Check::TableScan));
    }

    #[test]
    fn validation() {
        assert!(matches!(
            TransacterOptions::new().max_attempts(0).validate(),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(TransacterOptions::new()
            .retry_delay(Duration::from_secs(2), Duration::from_secs(1))
            .validate()
            .is_err());
    }

    #[test]
    fn only_vitess_is_sharded() {
        assert!(BackendType::Vitess.is_sharded());
        assert!(!BackendType::MySql.is_sharded());
        assert!(!BackendType::TiDb.is_sharded());
        assert_eq!(DataSourceConfig::default().backend.to_string(), "mysql");
    }
}
