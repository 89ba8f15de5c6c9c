//! Classification of retryable failures.

use crate::error::CoreError;
use shardtx_driver::DriverError;
use std::error::Error as StdError;

const CONNECTION_CLOSED: &str = "Connection is closed";
const VITESS_ABORTED: &str = "vttablet: rpc error: code = Aborted desc = transaction";
const VITESS_ENDED: &str = "ended at";

/// Returns true if a transaction that failed with `error` may be retried.
///
/// Walks the `source()` chain: an error is retryable if it, or any error
/// that caused it, is a transient conflict or a recoverable connection
/// failure. A failed post-commit hook is never retryable since the
/// transaction it belongs to has already committed.
pub fn is_retryable(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(core) = as_core(err) {
            match core {
                CoreError::RetryTransaction { .. } => return true,
                CoreError::PostCommitHookFailed { .. } | CoreError::SessionCloseFailed { .. } => {
                    return false
                }
                _ => {}
            }
        } else if let Some(driver) = as_driver(err) {
            if is_retryable_driver_error(driver) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

// Boxed sources show up as `Box<E>` rather than `E` in the chain.
fn as_core<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a CoreError> {
    err.downcast_ref::<CoreError>()
        .or_else(|| err.downcast_ref::<Box<CoreError>>().map(|boxed| &**boxed))
}

fn as_driver<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a DriverError> {
    err.downcast_ref::<DriverError>()
        .or_else(|| err.downcast_ref::<Box<DriverError>>().map(|boxed| &**boxed))
}

fn is_retryable_driver_error(error: &DriverError) -> bool {
    match error {
        DriverError::OptimisticLock { .. }
        | DriverError::StaleObject { .. }
        | DriverError::LockTimeout(_)
        | DriverError::RecoverableConnection(_)
        | DriverError::TransientSql(_) => true,
        DriverError::Sql { message, .. } => is_message_retryable(message),
        _ => false,
    }
}

fn is_message_retryable(message: &str) -> bool {
    message == CONNECTION_CLOSED
        || (message.contains(VITESS_ABORTED) && message.contains(VITESS_ENDED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardtx_driver::RecordId;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped(CoreError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn driver(error: DriverError) -> CoreError {
        CoreError::Driver(error)
    }

    #[test]
    fn conflict_kinds_are_retryable() {
        let stale = DriverError::StaleObject {
            table: "customers".into(),
            id: RecordId::new(1),
        };
        assert!(driver(stale).is_retryable());
        assert!(driver(DriverError::LockTimeout("t".into())).is_retryable());
        assert!(driver(DriverError::recoverable("reset by peer")).is_retryable());
        assert!(driver(DriverError::TransientSql("deadlock".into())).is_retryable());
        assert!(CoreError::retry("try again").is_retryable());
    }

    #[test]
    fn programming_errors_are_not_retryable() {
        assert!(!CoreError::illegal_state("nested").is_retryable());
        assert!(!CoreError::invalid_argument("bad").is_retryable());
        assert!(!driver(DriverError::ConstraintViolation("uk_name".into())).is_retryable());
        assert!(!driver(DriverError::sql("syntax error")).is_retryable());
    }

    #[test]
    fn retryable_sql_messages() {
        assert!(driver(DriverError::sql("Connection is closed")).is_retryable());
        assert!(driver(DriverError::sql(
            "vttablet: rpc error: code = Aborted desc = transaction 1572922696317821557: \
             ended at 2019-11-05 03:34:17.157 UTC (unlocked closed connection)"
        ))
        .is_retryable());
        assert!(!driver(DriverError::sql("Connection is closed!")).is_retryable());
    }

    #[test]
    fn causes_are_inspected() {
        let nested = DriverError::sql_caused_by(
            "could not execute batch",
            DriverError::sql_caused_by("statement failed", DriverError::LockTimeout("t".into())),
        );
        assert!(driver(nested).is_retryable());

        let app = CoreError::application(Wrapped(CoreError::retry("stale balance")));
        assert!(app.is_retryable());

        let app = CoreError::application(Wrapped(CoreError::illegal_state("nope")));
        assert!(!app.is_retryable());
    }

    #[test]
    fn suppressed_errors_classify_by_primary() {
        let err = driver(DriverError::LockTimeout("t".into()))
            .with_suppressed(CoreError::illegal_state("rollback failed"));
        assert!(err.is_retryable());

        let err = CoreError::illegal_state("boom")
            .with_suppressed(driver(DriverError::LockTimeout("t".into())));
        assert!(!err.is_retryable());
    }

    #[test]
    fn post_commit_failures_are_never_retried() {
        let err = CoreError::PostCommitHookFailed {
            source: Box::new(CoreError::retry("hook wants a retry")),
        };
        assert!(!err.is_retryable());
    }
}
