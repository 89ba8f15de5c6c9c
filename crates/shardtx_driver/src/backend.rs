//! Collaborator contracts consumed by the transaction engine.

use crate::check::CheckSet;
use crate::error::DriverResult;
use crate::record::{Record, RecordId};
use std::fmt;

/// Identity of a connection.
///
/// Drivers commonly hand out wrapper objects (pool proxies, tracing
/// wrappers) around one physical connection. [`Connection::physical_id`]
/// must see through those wrappers so two handles can be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// When the ORM session writes deferred changes to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Deferred changes are flushed before commit.
    #[default]
    Auto,
    /// Deferred changes are only written by an explicit `flush`.
    Manual,
}

/// A raw database connection.
pub trait Connection {
    /// Identity of this connection handle.
    fn id(&self) -> ConnectionId;

    /// Identity of the physical connection behind this handle.
    fn physical_id(&self) -> ConnectionId {
        self.id()
    }

    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database rejects the statement.
    fn execute(&mut self, sql: &str) -> DriverResult<u64>;

    /// Runs a query and returns its rows as string columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the database rejects the query.
    fn query(&mut self, sql: &str) -> DriverResult<Vec<Vec<String>>>;
}

/// An ORM session bound to one connection.
///
/// Writes are deferred until `flush`; `commit` applies flushed writes
/// atomically. Conflicts must surface as the specific [`DriverError`]
/// kinds so the engine can classify them.
///
/// [`DriverError`]: crate::DriverError
pub trait OrmSession {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active or the
    /// connection fails.
    fn begin_transaction(&mut self) -> DriverResult<()>;

    /// Returns true while a transaction is active.
    fn is_transaction_active(&self) -> bool;

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active or the commit fails.
    fn commit(&mut self) -> DriverResult<()>;

    /// Rolls back the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active or the rollback fails.
    fn rollback(&mut self) -> DriverResult<()>;

    /// Writes deferred changes to the database.
    ///
    /// # Errors
    ///
    /// Returns conflict and constraint errors detected while writing.
    fn flush(&mut self) -> DriverResult<()>;

    /// Makes loaded records read-only by default; changes to them are not
    /// persisted.
    fn set_default_read_only(&mut self, read_only: bool);

    /// Sets the flush mode.
    fn set_flush_mode(&mut self, mode: FlushMode);

    /// Tells the session which safety checks are currently suppressed.
    fn set_suppressed_checks(&mut self, checks: CheckSet);

    /// Loads a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&mut self, table: &str, id: RecordId) -> DriverResult<Option<Record>>;

    /// Schedules a new record for insertion and returns its generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be scheduled.
    fn save(&mut self, record: &Record) -> DriverResult<RecordId>;

    /// Schedules an update of a previously loaded record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be scheduled.
    fn update(&mut self, record: &Record) -> DriverResult<()>;

    /// Schedules a record for deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be scheduled.
    fn delete(&mut self, table: &str, id: RecordId) -> DriverResult<()>;

    /// Returns the raw connection behind this session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed.
    fn connection(&mut self) -> DriverResult<&mut dyn Connection>;

    /// Closes the session and releases its connection.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the connection fails.
    fn close(&mut self) -> DriverResult<()>;
}

/// Opens ORM sessions.
pub trait SessionFactory: Send + Sync {
    /// Opens a new session on a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained.
    fn open_session(&self) -> DriverResult<Box<dyn OrmSession>>;
}
