//! One transaction attempt's view of the database.

use super::hooks::Hooks;
use crate::config::TransacterOptions;
use crate::error::{CoreError, CoreResult};
use crate::shard::{self, Keyspace, Shard, ShardDirectory, ShardSet};
use shardtx_driver::{
    Check, CheckSet, Connection, ConnectionId, EntityGroup, FlushMode, OrmSession, Record,
    RecordId, SessionFactory,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Wraps one ORM session for the lifetime of one transaction attempt.
///
/// Sessions are created by a [`Transacter`](crate::Transacter) and handed to
/// the transaction body. Writes go through [`save`](Self::save),
/// [`update`](Self::update) and [`delete`](Self::delete) so that read-only
/// mode and entity-group checks are enforced before the ORM sees them.
pub struct Session {
    id: Uuid,
    orm: Box<dyn OrmSession>,
    directory: Arc<dyn ShardDirectory>,
    read_only: bool,
    disabled_checks: CheckSet,
    hooks: Hooks,
    in_transaction: bool,
    root_connection: ConnectionId,
    previous_connection: Option<ConnectionId>,
    written_roots: BTreeSet<RecordId>,
    closed: bool,
}

impl Session {
    pub(crate) fn open(
        factory: &dyn SessionFactory,
        directory: Arc<dyn ShardDirectory>,
        options: &TransacterOptions,
        previous_connection: Option<ConnectionId>,
    ) -> CoreResult<Self> {
        let mut orm = factory.open_session()?;
        if options.read_only {
            orm.set_default_read_only(true);
            orm.set_flush_mode(FlushMode::Manual);
        }
        orm.set_suppressed_checks(options.disabled_checks);
        let root_connection = orm.connection()?.physical_id();

        Ok(Self {
            id: Uuid::new_v4(),
            orm,
            directory,
            read_only: options.read_only,
            disabled_checks: options.disabled_checks,
            hooks: Hooks::default(),
            in_transaction: false,
            root_connection,
            previous_connection,
            written_roots: BTreeSet::new(),
            closed: false,
        })
    }

    /// Unique id of this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns true if writes are rejected.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Returns true between begin and commit or rollback.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Physical connection this session runs on.
    #[must_use]
    pub fn root_connection(&self) -> ConnectionId {
        self.root_connection
    }

    /// Whether this attempt reuses the previous attempt's physical
    /// connection. `None` on the first attempt.
    #[must_use]
    pub fn same_connection_as_previous(&self) -> Option<bool> {
        self.previous_connection
            .map(|previous| previous == self.root_connection)
    }

    /// Checks currently suppressed.
    #[must_use]
    pub fn disabled_checks(&self) -> CheckSet {
        self.disabled_checks
    }

    /// Returns true if `check` is enforced.
    #[must_use]
    pub fn check_enabled(&self, check: Check) -> bool {
        !self.disabled_checks.contains(check)
    }

    /// Schedules a new record and returns its generated id.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the session is read-only
    /// - `InvalidArgument` for a child whose root id is unset
    /// - `CheckViolation` if the write touches a second entity group while
    ///   the cowrite check is enforced
    pub fn save(&mut self, record: &Record) -> CoreResult<RecordId> {
        self.ensure_writable("save")?;
        match record.group {
            EntityGroup::Root => {
                // A new root always opens a new entity group.
                self.check_group_write(&record.table, None)?;
                let id = self.orm.save(record)?;
                self.written_roots.insert(id);
                Ok(id)
            }
            EntityGroup::Child { root } => {
                if !root.is_assigned() {
                    return Err(CoreError::invalid_argument(format!(
                        "{} row has no root id",
                        record.table
                    )));
                }
                self.record_group_write(&record.table, root)?;
                Ok(self.orm.save(record)?)
            }
            EntityGroup::Unsharded => Ok(self.orm.save(record)?),
        }
    }

    /// Schedules an update of a loaded record.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save), plus `InvalidArgument` for a record
    /// that was never saved.
    pub fn update(&mut self, record: &Record) -> CoreResult<()> {
        self.ensure_writable("update")?;
        let id = Self::persistent_id(record)?;
        if let Some(root) = Self::group_root(record.group, id) {
            self.record_group_write(&record.table, root)?;
        }
        Ok(self.orm.update(record)?)
    }

    /// Schedules a record for deletion.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update).
    pub fn delete(&mut self, record: &Record) -> CoreResult<()> {
        self.ensure_writable("delete")?;
        let id = Self::persistent_id(record)?;
        if let Some(root) = Self::group_root(record.group, id) {
            self.record_group_write(&record.table, root)?;
        }
        Ok(self.orm.delete(&record.table, id)?)
    }

    /// Loads a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such record.
    pub fn load(&mut self, table: &str, id: RecordId) -> CoreResult<Record> {
        self.load_or_none(table, id)?
            .ok_or_else(|| CoreError::not_found(table, id))
    }

    /// Loads a record if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn load_or_none(&mut self, table: &str, id: RecordId) -> CoreResult<Option<Record>> {
        Ok(self.orm.get(table, id)?)
    }

    /// Lists the shards of the cluster.
    ///
    /// Backends that are not sharded report a single shard without
    /// querying.
    ///
    /// # Errors
    ///
    /// Returns a recoverable connection error if discovery keeps reporting
    /// no shards.
    pub fn shards(&mut self) -> CoreResult<ShardSet> {
        let directory = self.directory();
        self.use_connection(|connection| directory.list_shards(connection))
    }

    /// Lists the shards of one keyspace.
    ///
    /// # Errors
    ///
    /// Same as [`shards`](Self::shards).
    pub fn shards_in(&mut self, keyspace: &Keyspace) -> CoreResult<ShardSet> {
        Ok(shard::in_keyspace(self.shards()?, keyspace))
    }

    /// Runs `body` with the connection routed to `shard`, restoring the
    /// previous target afterwards even if `body` fails.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`, or of switching or restoring the target.
    pub fn target<T, F>(&mut self, shard: &Shard, body: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Session) -> CoreResult<T>,
    {
        shard::with_target(self, shard, body)
    }

    /// Hands the raw connection to `f`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or `SessionClosed` after close.
    pub fn use_connection<T, F>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut dyn Connection) -> CoreResult<T>,
    {
        f(self.orm.connection()?)
    }

    /// Runs `body` with `checks` suppressed, or every check if `checks` is
    /// empty. The previous set is restored when `body` returns.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`.
    pub fn without_checks<T, F>(&mut self, checks: &[Check], body: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Session) -> CoreResult<T>,
    {
        let previous = self.disabled_checks;
        let suppressed = if checks.is_empty() {
            CheckSet::all()
        } else {
            CheckSet::of(checks)
        };
        self.set_disabled_checks(suppressed);
        let result = body(self);
        self.set_disabled_checks(previous);
        result
    }

    /// Registers a hook run before commit. An error aborts the transaction.
    pub fn on_pre_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() -> CoreResult<()> + 'static,
    {
        self.hooks.on_pre_commit(Box::new(hook));
    }

    /// Registers a hook run after a successful commit.
    pub fn on_post_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() -> CoreResult<()> + 'static,
    {
        self.hooks.on_post_commit(Box::new(hook));
    }

    /// Registers a hook run after the connection has been released. It may
    /// start a new transaction.
    pub fn on_session_close<F>(&mut self, hook: F)
    where
        F: FnOnce() -> CoreResult<()> + 'static,
    {
        self.hooks.on_session_close(Box::new(hook));
    }

    /// The underlying ORM session. Writes made here bypass the checks of
    /// this session.
    pub fn orm_session(&mut self) -> &mut dyn OrmSession {
        self.orm.as_mut()
    }

    pub(crate) fn directory(&self) -> Arc<dyn ShardDirectory> {
        Arc::clone(&self.directory)
    }

    pub(crate) fn begin(&mut self) -> CoreResult<()> {
        self.orm.begin_transaction()?;
        self.in_transaction = true;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> CoreResult<()> {
        Ok(self.orm.flush()?)
    }

    pub(crate) fn pre_commit(&mut self) -> CoreResult<()> {
        self.hooks.run_pre_commit()
    }

    pub(crate) fn commit(&mut self) -> CoreResult<()> {
        self.orm.commit()?;
        self.in_transaction = false;
        Ok(())
    }

    pub(crate) fn post_commit(&mut self) -> CoreResult<()> {
        self.hooks.run_post_commit()
    }

    /// Rolls back after `error` if the transaction is still active. A
    /// rollback failure is attached to `error`.
    pub(crate) fn rollback_after(&mut self, error: CoreError) -> CoreError {
        self.in_transaction = false;
        self.hooks.discard_commit_hooks();
        if !self.orm.is_transaction_active() {
            return error;
        }
        match self.orm.rollback() {
            Ok(()) => error,
            Err(rollback_error) => {
                warn!(
                    session_id = %self.id,
                    error = %rollback_error,
                    "rollback failed"
                );
                error.with_suppressed(rollback_error.into())
            }
        }
    }

    /// Releases the connection, then runs the close hooks.
    pub(crate) fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.in_transaction = false;
        let released = self.orm.close().map_err(CoreError::from);
        let hooks = self.hooks.run_session_close();
        match (released, hooks) {
            (Ok(()), result) | (result, Ok(())) => result,
            (Err(error), Err(hook_error)) => Err(error.with_suppressed(hook_error)),
        }
    }

    fn set_disabled_checks(&mut self, checks: CheckSet) {
        self.disabled_checks = checks;
        self.orm.set_suppressed_checks(checks);
    }

    fn ensure_writable(&self, operation: &str) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::illegal_state(format!(
                "{operation} not permitted in a read-only session"
            )));
        }
        Ok(())
    }

    fn persistent_id(record: &Record) -> CoreResult<RecordId> {
        record
            .id
            .filter(|id| id.is_assigned())
            .ok_or_else(|| {
                CoreError::invalid_argument(format!("{} row was never saved", record.table))
            })
    }

    fn group_root(group: EntityGroup, id: RecordId) -> Option<RecordId> {
        match group {
            EntityGroup::Root => Some(id),
            EntityGroup::Child { root } => Some(root),
            EntityGroup::Unsharded => None,
        }
    }

    fn record_group_write(&mut self, table: &str, root: RecordId) -> CoreResult<()> {
        if self.written_roots.contains(&root) {
            return Ok(());
        }
        self.check_group_write(table, Some(root))?;
        self.written_roots.insert(root);
        Ok(())
    }

    /// Rejects a write to a group not yet written when another group was.
    /// `None` stands for the group of a root that has no id yet.
    fn check_group_write(&self, table: &str, root: Option<RecordId>) -> CoreResult<()> {
        if !self.check_enabled(Check::Cowrite) || self.written_roots.is_empty() {
            return Ok(());
        }
        let group = root.map_or_else(|| "new".to_string(), |root| root.to_string());
        Err(CoreError::check_violation(
            Check::Cowrite,
            format!(
                "{table} write touches entity group {group} after writes to {:?}",
                self.written_roots
            ),
        ))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("in_transaction", &self.in_transaction)
            .field("root_connection", &self.root_connection)
            .field("disabled_checks", &self.disabled_checks)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
