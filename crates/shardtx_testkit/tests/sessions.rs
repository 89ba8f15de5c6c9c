//! Session lifecycle: nesting, read-only mode, hooks and checks.

use parking_lot::Mutex;
use shardtx_core::{CoreError, CoreResult};
use shardtx_driver::{Check, CheckSet, DriverError, Record};
use shardtx_testkit::prelude::*;
use std::sync::Arc;

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> impl FnOnce() -> CoreResult<()> + 'static {
    let log = Arc::clone(log);
    let entry = entry.to_string();
    move || {
        log.lock().push(entry);
        Ok(())
    }
}

#[test]
fn nested_transactions_fail_fast() {
    let cluster = TestCluster::unsharded();
    for inner in [
        cluster.transacter.clone(),
        cluster.no_retries(),
        cluster.read_only(),
        cluster.allow_cowrites(),
        cluster.retries(5),
    ] {
        let err = cluster
            .transaction(|_| inner.transaction(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalState { .. }));
    }
    assert!(!cluster.in_transaction());
    assert_eq!(cluster.sleeper.count(), 0);
}

#[test]
fn in_transaction_tracks_the_calling_thread() {
    let cluster = TestCluster::unsharded();
    assert!(!cluster.in_transaction());
    let transacter = cluster.transacter.clone();
    cluster
        .transaction(move |session| {
            assert!(session.in_transaction());
            assert!(transacter.in_transaction());
            let other = transacter.clone();
            let elsewhere = std::thread::spawn(move || other.in_transaction())
                .join()
                .unwrap();
            assert!(!elsewhere);
            Ok(())
        })
        .unwrap();
    assert!(!cluster.in_transaction());
}

#[test]
fn read_only_transacter_rejects_saves() {
    let cluster = TestCluster::unsharded();
    let err = cluster
        .read_only()
        .transaction(|session| session.save(&Record::root("customers")))
        .unwrap_err();
    assert!(matches!(err, CoreError::IllegalState { .. }));
    assert!(cluster.db.records("customers").is_empty());
}

#[test]
fn read_only_transacter_never_flushes() {
    let cluster = TestCluster::unsharded();
    let id = cluster
        .db
        .insert(Record::root("customers").with_field("name", "ada"));

    cluster
        .read_only()
        .transaction(|session| {
            let mut record = session.load("customers", id)?;
            record.set("name", "grace");
            session.orm_session().update(&record)?;
            Ok(())
        })
        .unwrap();

    let stats = cluster.db.stats();
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.ignored_updates, 1);
    let stored = cluster.db.record("customers", id).unwrap();
    assert_eq!(stored.field("name"), Some("ada"));
}

#[test]
fn derived_transacters_leave_the_original_alone() {
    let cluster = TestCluster::unsharded();
    let original = cluster.options();

    let _ = cluster.retries(7);
    let _ = cluster.no_retries();
    let _ = cluster.read_only();
    let allowing = cluster.allow_cowrites();
    assert_eq!(cluster.options(), original);
    assert!(allowing.options().disabled_checks.contains(Check::Cowrite));

    let mut allowing_options = allowing.options();
    allowing_options.disabled_checks = allowing_options.disabled_checks.with(Check::TableScan);
    assert!(!cluster.options().disabled_checks.contains(Check::TableScan));
    assert!(!allowing.options().disabled_checks.contains(Check::TableScan));

    // The original still enforces cowrites and still writes.
    let err = cluster
        .transaction(|session| {
            session.save(&Record::root("customers"))?;
            session.save(&Record::root("customers"))
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::CheckViolation { .. }));

    allowing
        .transaction(|session| {
            session.save(&Record::root("customers"))?;
            session.save(&Record::root("customers"))
        })
        .unwrap();
    assert_eq!(cluster.db.records("customers").len(), 2);
}

#[test]
fn hooks_run_in_order_around_commit() {
    let cluster = TestCluster::unsharded();
    let events = log();
    let watcher = cluster.db.clone();
    let seen = Arc::clone(&events);

    cluster
        .transaction(|session| {
            session.on_post_commit(push(&events, "post-1"));
            session.on_pre_commit(push(&events, "pre-1"));
            session.on_session_close(push(&events, "close-1"));
            session.on_post_commit(push(&events, "post-2"));
            session.on_pre_commit(push(&events, "pre-2"));
            session.on_post_commit(push(&events, "post-3"));
            session.on_session_close(push(&events, "close-2"));

            let db = watcher.clone();
            let seen = Arc::clone(&seen);
            session.on_pre_commit(move || {
                seen.lock().push(format!("commits={}", db.stats().commits));
                Ok(())
            });
            session.save(&Record::root("customers"))
        })
        .unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "pre-1", "pre-2", "commits=0", "post-1", "post-2", "post-3", "close-1", "close-2"
        ]
    );
}

#[test]
fn pre_commit_failure_rolls_back() {
    let cluster = TestCluster::unsharded();
    let events = log();

    let err = cluster
        .transaction(|session| {
            session.on_pre_commit(|| Err(CoreError::illegal_state("invariant broken")));
            session.on_post_commit(push(&events, "post"));
            session.on_session_close(push(&events, "close"));
            session.save(&Record::root("customers"))
        })
        .unwrap_err();

    assert!(matches!(err, CoreError::IllegalState { .. }));
    assert!(cluster.db.records("customers").is_empty());
    assert_eq!(cluster.db.stats().rollbacks, 1);
    assert_eq!(*events.lock(), vec!["close"]);
}

#[test]
fn post_commit_failure_keeps_the_commit() {
    let cluster = TestCluster::unsharded().with_options(fast_retries(3));
    let events = log();

    let mut attempts = 0;
    let err = cluster
        .transaction(|session| {
            attempts += 1;
            session.on_post_commit(push(&events, "first"));
            session.on_post_commit(|| {
                Err(DriverError::recoverable("notification service down").into())
            });
            session.on_post_commit(push(&events, "skipped"));
            session.save(&Record::root("customers"))
        })
        .unwrap_err();

    assert!(matches!(err, CoreError::PostCommitHookFailed { .. }));
    assert_eq!(attempts, 1);
    assert_eq!(cluster.db.stats().rollbacks, 0);
    assert_eq!(cluster.db.records("customers").len(), 1);
    assert_eq!(*events.lock(), vec!["first"]);
}

#[test]
fn close_hooks_may_start_new_transactions() {
    let cluster = TestCluster::unsharded();
    let follow_up = cluster.transacter.clone();
    let result = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);

    cluster
        .transaction(|session| {
            let follow_up = follow_up.clone();
            let slot = Arc::clone(&slot);
            session.on_session_close(move || {
                let id = follow_up.transaction(|s| s.save(&Record::unsharded("audit")))?;
                *slot.lock() = Some(id);
                Ok(())
            });
            session.save(&Record::root("customers"))
        })
        .unwrap();

    let id = result.lock().expect("close hook did not run");
    assert!(cluster.db.record("audit", id).is_some());
    assert!(!cluster.in_transaction());
}

#[test]
fn close_hook_failure_after_commit_is_reported() {
    let cluster = TestCluster::unsharded().with_options(fast_retries(3));
    let err = cluster
        .transaction(|session| {
            session.on_session_close(|| Err(CoreError::retry("ignored")));
            session.save(&Record::root("customers"))
        })
        .unwrap_err();

    assert!(matches!(err, CoreError::SessionCloseFailed { .. }));
    assert_eq!(cluster.db.records("customers").len(), 1);
    assert_eq!(cluster.sleeper.count(), 0);
}

#[test]
fn hooks_of_failed_attempts_do_not_leak_into_retries() {
    let cluster = TestCluster::unsharded().with_options(fast_retries(2));
    let events = log();

    let mut attempt = 0;
    cluster
        .transaction(|session| {
            attempt += 1;
            session.on_post_commit(push(&events, &format!("post-{attempt}")));
            if attempt == 1 {
                return Err(CoreError::retry("again"));
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(*events.lock(), vec!["post-2"]);
}

#[test]
fn cowrite_check_spans_entity_groups() {
    let cluster = TestCluster::unsharded();
    let customer = cluster.db.insert(Record::root("customers"));
    let other = cluster.db.insert(Record::root("customers"));

    cluster
        .transaction(|session| {
            session.save(&Record::child("orders", customer))?;
            session.save(&Record::child("orders", customer))?;
            session.save(&Record::unsharded("settings"))?;
            let record = session.load("customers", customer)?;
            session.update(&record)
        })
        .unwrap();

    let err = cluster
        .transaction(|session| {
            session.save(&Record::child("orders", customer))?;
            session.save(&Record::child("orders", other))
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::CheckViolation {
            check: Check::Cowrite,
            ..
        }
    ));

    cluster
        .transaction(|session| {
            session.save(&Record::child("orders", customer))?;
            session.without_checks(&[Check::Cowrite], |s| {
                s.save(&Record::child("orders", other))
            })
        })
        .unwrap();
    assert_eq!(cluster.db.records("orders").len(), 4);
}

#[test]
fn without_checks_is_visible_to_the_driver() {
    let cluster = TestCluster::sharded(["commerce/0"]);
    cluster
        .transaction(|session| {
            session.without_checks(&[], |s| {
                s.use_connection(|c| Ok(c.execute("DELETE FROM carts")?))
            })?;
            session.use_connection(|c| Ok(c.execute("SELECT 1")?))
        })
        .unwrap();

    let suppressed = |sql: &str| {
        cluster
            .db
            .statements()
            .into_iter()
            .find(|statement| statement.sql == sql)
            .map(|statement| statement.suppressed)
    };
    assert_eq!(suppressed("DELETE FROM carts"), Some(CheckSet::all()));
    assert_eq!(suppressed("SELECT 1"), Some(CheckSet::empty()));
}

#[test]
fn swallowed_cowrite_violation_saves_nothing() {
    let cluster = TestCluster::unsharded();
    cluster
        .transaction(|session| {
            session.save(&Record::root("customers"))?;
            match session.save(&Record::root("customers")) {
                Err(CoreError::CheckViolation {
                    check: Check::Cowrite,
                    ..
                }) => Ok(()),
                other => panic!("expected a cowrite violation, got {other:?}"),
            }
        })
        .unwrap();
    assert_eq!(cluster.db.records("customers").len(), 1);
}
