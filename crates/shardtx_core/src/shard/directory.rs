//! Shard discovery and connection targeting.

use super::model::{single_shard_set, Shard, ShardSet};
use crate::config::BackendType;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Session;
use shardtx_driver::{Connection, DriverError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const SHOW_SHARDS: &str = "SHOW VITESS_SHARDS";
const SHOW_TARGET: &str = "SHOW VITESS_TARGET";

/// Knows how to enumerate and address the shards of a backend.
pub trait ShardDirectory: Send + Sync + fmt::Debug {
    /// Returns true if the backend is partitioned into shards.
    fn is_sharded(&self) -> bool;

    /// Lists the shards visible through `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or reports no shards.
    fn list_shards(&self, connection: &mut dyn Connection) -> CoreResult<ShardSet>;

    /// Returns the current target of `connection`, empty if untargeted.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be read.
    fn current_target(&self, connection: &mut dyn Connection) -> CoreResult<String>;

    /// Routes `connection` to `target`, or clears routing for `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the switch is rejected.
    fn set_target(&self, connection: &mut dyn Connection, target: Option<&str>) -> CoreResult<()>;
}

/// Returns the directory for a backend.
#[must_use]
pub fn directory_for(backend: BackendType) -> Arc<dyn ShardDirectory> {
    if backend.is_sharded() {
        Arc::new(VitessShardDirectory)
    } else {
        Arc::new(SingleShardDirectory)
    }
}

/// Directory of a Vitess cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct VitessShardDirectory;

impl VitessShardDirectory {
    fn query_shards(connection: &mut dyn Connection) -> CoreResult<ShardSet> {
        let rows = connection.query(SHOW_SHARDS)?;
        rows.iter()
            .filter_map(|row| row.first())
            .map(|name| Shard::parse(name))
            .collect()
    }
}

impl ShardDirectory for VitessShardDirectory {
    fn is_sharded(&self) -> bool {
        true
    }

    fn list_shards(&self, connection: &mut dyn Connection) -> CoreResult<ShardSet> {
        let shards = Self::query_shards(connection)?;
        if !shards.is_empty() {
            return Ok(shards);
        }

        // Discovery occasionally answers with nothing; ask once more.
        warn!(
            connection = %connection.physical_id(),
            "shard discovery returned no shards, retrying"
        );
        let shards = Self::query_shards(connection)?;
        if shards.is_empty() {
            return Err(DriverError::recoverable("shard discovery returned no shards").into());
        }
        Ok(shards)
    }

    fn current_target(&self, connection: &mut dyn Connection) -> CoreResult<String> {
        let rows = connection.query(SHOW_TARGET)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or_default())
    }

    fn set_target(&self, connection: &mut dyn Connection, target: Option<&str>) -> CoreResult<()> {
        let statement = match target {
            Some(target) if !target.trim().is_empty() => format!("USE `{target}`"),
            _ => "USE".to_string(),
        };
        connection.execute(&statement)?;
        Ok(())
    }
}

/// Directory of a backend that is not sharded.
///
/// Reports the single-shard set and never touches the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleShardDirectory;

impl ShardDirectory for SingleShardDirectory {
    fn is_sharded(&self) -> bool {
        false
    }

    fn list_shards(&self, _connection: &mut dyn Connection) -> CoreResult<ShardSet> {
        Ok(single_shard_set())
    }

    fn current_target(&self, _connection: &mut dyn Connection) -> CoreResult<String> {
        Ok(String::new())
    }

    fn set_target(
        &self,
        _connection: &mut dyn Connection,
        _target: Option<&str>,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Runs `body` with the session's connection routed to `shard`.
///
/// The previous target is restored on every exit path, including a panic
/// in `body`. Reading, switching and restoring the target run with all
/// checks suppressed. Nothing is issued when the connection already points
/// at `shard` or the backend is not sharded.
pub(crate) fn with_target<T, F>(session: &mut Session, shard: &Shard, body: F) -> CoreResult<T>
where
    F: FnOnce(&mut Session) -> CoreResult<T>,
{
    let directory = session.directory();
    if !directory.is_sharded() {
        return body(session);
    }

    let wanted = shard.to_string();
    let previous = session.without_checks(&[], |s| {
        s.use_connection(|connection| directory.current_target(connection))
    })?;
    if previous == wanted {
        return body(session);
    }

    session.without_checks(&[], |s| {
        s.use_connection(|connection| directory.set_target(connection, Some(&wanted)))
    })?;
    debug!(shard = %wanted, previous = %previous, "switched connection target");

    let mut guard = TargetGuard {
        session,
        directory,
        previous,
        restored: false,
    };
    let result = body(&mut *guard.session);
    let restore = guard.restore();
    debug!(shard = %wanted, restored = %guard.previous, "restored connection target");

    match (result, restore) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(error)) | (Err(error), Ok(())) => Err(error),
        (Err(error), Err(restore_error)) => Err(error.with_suppressed(restore_error)),
    }
}

/// Puts a switched connection back on its previous target, on drop if
/// nothing restored it first.
struct TargetGuard<'a> {
    session: &'a mut Session,
    directory: Arc<dyn ShardDirectory>,
    previous: String,
    restored: bool,
}

impl TargetGuard<'_> {
    fn restore(&mut self) -> CoreResult<()> {
        self.restored = true;
        let directory = Arc::clone(&self.directory);
        let target = (!self.previous.is_empty()).then(|| self.previous.clone());
        self.session.without_checks(&[], |s| {
            s.use_connection(|connection| directory.set_target(connection, target.as_deref()))
        })
    }
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(error) = self.restore() {
            warn!(previous = %self.previous, error = %error, "failed to restore connection target");
        }
    }
}

/// Filters a shard set down to one keyspace.
pub(crate) fn in_keyspace(shards: ShardSet, keyspace: &super::Keyspace) -> ShardSet {
    shards
        .into_iter()
        .filter(|shard| shard.keyspace() == keyspace)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardtx_driver::{InMemoryDatabase, OrmSession, SessionFactory};

    fn connection_of(db: &InMemoryDatabase) -> Box<dyn OrmSession> {
        db.open_session().unwrap()
    }

    #[test]
    fn lists_vitess_shards() {
        let db = InMemoryDatabase::sharded(["commerce/-80", "commerce/80-", "customer/0"]);
        let mut session = connection_of(&db);
        let shards = VitessShardDirectory
            .list_shards(session.connection().unwrap())
            .unwrap();

        let names: Vec<_> = shards.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["commerce/-80", "commerce/80-", "customer/0"]);
    }

    #[test]
    fn empty_listing_is_retried_once() {
        let db = InMemoryDatabase::sharded(["commerce/0"]);
        db.script_shard_listing(Vec::<String>::new());
        let mut session = connection_of(&db);

        let shards = VitessShardDirectory
            .list_shards(session.connection().unwrap())
            .unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(db.statements().len(), 2);
    }

    #[test]
    fn two_empty_listings_are_recoverable() {
        let db = InMemoryDatabase::sharded(["commerce/0"]);
        db.script_shard_listing(Vec::<String>::new());
        db.script_shard_listing(Vec::<String>::new());
        let mut session = connection_of(&db);

        let err = VitessShardDirectory
            .list_shards(session.connection().unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Driver(DriverError::RecoverableConnection(_))
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_listing_is_an_argument_error() {
        let db = InMemoryDatabase::sharded(["commerce"]);
        let mut session = connection_of(&db);
        assert!(matches!(
            VitessShardDirectory.list_shards(session.connection().unwrap()),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn target_statements() {
        let db = InMemoryDatabase::sharded(["commerce/-80"]);
        let mut session = connection_of(&db);
        let connection = session.connection().unwrap();

        assert_eq!(VitessShardDirectory.current_target(connection).unwrap(), "");
        VitessShardDirectory
            .set_target(connection, Some("commerce/-80"))
            .unwrap();
        assert_eq!(
            VitessShardDirectory.current_target(connection).unwrap(),
            "commerce/-80"
        );
        VitessShardDirectory.set_target(connection, None).unwrap();

        let sql: Vec<_> = db.statements().into_iter().map(|s| s.sql).collect();
        assert_eq!(
            sql,
            vec![
                "SHOW VITESS_TARGET",
                "USE `commerce/-80`",
                "SHOW VITESS_TARGET",
                "USE"
            ]
        );
    }

    #[test]
    fn single_shard_directory_issues_nothing() {
        let db = InMemoryDatabase::new();
        let mut session = connection_of(&db);
        let connection = session.connection().unwrap();

        let shards = SingleShardDirectory.list_shards(connection).unwrap();
        assert_eq!(shards, single_shard_set());
        SingleShardDirectory.set_target(connection, Some("x/0")).unwrap();
        assert!(db.statements().is_empty());
    }

    #[test]
    fn directory_follows_backend() {
        assert!(directory_for(BackendType::Vitess).is_sharded());
        assert!(!directory_for(BackendType::Postgresql).is_sharded());
    }
}
