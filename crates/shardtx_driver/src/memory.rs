//! In-memory driver for testing.

use crate::backend::{Connection, ConnectionId, FlushMode, OrmSession, SessionFactory};
use crate::check::CheckSet;
use crate::error::{DriverError, DriverResult};
use crate::record::{Record, RecordId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

const SHOW_SHARDS: &str = "SHOW VITESS_SHARDS";
const SHOW_TARGET: &str = "SHOW VITESS_TARGET";

/// Shape of the simulated database cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterLayout {
    /// A single database; shard metadata statements are rejected.
    Unsharded,
    /// A sharding proxy exposing the given `<keyspace>/<shard>` names.
    Sharded {
        /// Shard names reported by shard discovery.
        shards: Vec<String>,
    },
}

/// A statement observed by an in-memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRecord {
    /// Physical connection the statement ran on.
    pub connection: ConnectionId,
    /// The statement text.
    pub sql: String,
    /// Checks suppressed by the session when the statement ran.
    pub suppressed: CheckSet,
    /// Connection target when the statement started.
    pub target: String,
}

/// Counters kept by the in-memory driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Sessions opened.
    pub sessions_opened: u64,
    /// Sessions closed.
    pub sessions_closed: u64,
    /// Transactions begun.
    pub begins: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Successful commits.
    pub commits: u64,
    /// Rollbacks requested.
    pub rollbacks: u64,
    /// Updates dropped because the session was read-only.
    pub ignored_updates: u64,
}

#[derive(Debug, Default)]
struct Faults {
    open: VecDeque<DriverError>,
    begin: VecDeque<DriverError>,
    flush: VecDeque<DriverError>,
    commit: VecDeque<DriverError>,
    rollback: VecDeque<DriverError>,
    shard_listings: VecDeque<Vec<String>>,
}

#[derive(Debug)]
struct State {
    tables: HashMap<String, BTreeMap<RecordId, Record>>,
    next_record_id: u64,
    layout: ClusterLayout,
    reuse_connections: bool,
    idle_connections: Vec<ConnectionId>,
    next_connection_id: u64,
    next_handle_id: u64,
    targets: HashMap<ConnectionId, String>,
    statements: Vec<StatementRecord>,
    faults: Faults,
    stats: DriverStats,
}

impl State {
    fn new(layout: ClusterLayout) -> Self {
        Self {
            tables: HashMap::new(),
            next_record_id: 1,
            layout,
            reuse_connections: true,
            idle_connections: Vec::new(),
            next_connection_id: 1,
            next_handle_id: 1,
            targets: HashMap::new(),
            statements: Vec::new(),
            faults: Faults::default(),
            stats: DriverStats::default(),
        }
    }

    fn allocate_record_id(&mut self) -> RecordId {
        let id = RecordId::new(self.next_record_id);
        self.next_record_id += 1;
        id
    }

    fn committed(&self, table: &str, id: RecordId) -> Option<&Record> {
        self.tables.get(table).and_then(|rows| rows.get(&id))
    }
}

/// An in-memory database implementing [`SessionFactory`].
///
/// Suitable for unit and integration tests of code that runs transactions:
/// - writes are deferred until flush and applied atomically on commit
/// - updates are version-checked and surface optimistic-lock conflicts
/// - physical connections are pooled, so retries can land on the same one
/// - a sharded layout answers shard discovery and target statements
/// - faults can be scripted for each lifecycle step
///
/// # Example
///
/// ```rust
/// use shardtx_driver::{InMemoryDatabase, Record, SessionFactory};
///
/// let db = InMemoryDatabase::new();
/// let mut session = db.open_session().unwrap();
/// session.begin_transaction().unwrap();
/// let id = session.save(&Record::root("customers")).unwrap();
/// session.flush().unwrap();
/// session.commit().unwrap();
/// session.close().unwrap();
/// assert!(db.record("customers", id).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    /// Creates an unsharded database.
    #[must_use]
    pub fn new() -> Self {
        Self::with_layout(ClusterLayout::Unsharded)
    }

    /// Creates a sharded database reporting the given shard names.
    pub fn sharded<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_layout(ClusterLayout::Sharded {
            shards: shards.into_iter().map(Into::into).collect(),
        })
    }

    /// Creates a database with an explicit layout.
    #[must_use]
    pub fn with_layout(layout: ClusterLayout) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(layout))),
        }
    }

    /// Returns the cluster layout.
    #[must_use]
    pub fn layout(&self) -> ClusterLayout {
        self.state.lock().layout.clone()
    }

    /// Controls whether released physical connections are handed out again.
    pub fn set_connection_reuse(&self, reuse: bool) {
        let mut state = self.state.lock();
        state.reuse_connections = reuse;
        if !reuse {
            state.idle_connections.clear();
        }
    }

    /// Makes the next `open_session` fail with `error`.
    pub fn fail_next_open(&self, error: DriverError) {
        self.state.lock().faults.open.push_back(error);
    }

    /// Makes the next `begin_transaction` fail with `error`.
    pub fn fail_next_begin(&self, error: DriverError) {
        self.state.lock().faults.begin.push_back(error);
    }

    /// Makes the next `flush` fail with `error`.
    pub fn fail_next_flush(&self, error: DriverError) {
        self.state.lock().faults.flush.push_back(error);
    }

    /// Makes the next `commit` fail with `error`.
    pub fn fail_next_commit(&self, error: DriverError) {
        self.state.lock().faults.commit.push_back(error);
    }

    /// Makes the next `rollback` fail with `error`.
    pub fn fail_next_rollback(&self, error: DriverError) {
        self.state.lock().faults.rollback.push_back(error);
    }

    /// Scripts the answer of the next shard discovery query.
    ///
    /// Scripted answers are consumed in order; once exhausted, discovery
    /// reports the shards of the layout.
    pub fn script_shard_listing<I, S>(&self, shards: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listing = shards.into_iter().map(Into::into).collect();
        self.state.lock().faults.shard_listings.push_back(listing);
    }

    /// Inserts a committed record directly, bypassing sessions.
    pub fn insert(&self, mut record: Record) -> RecordId {
        let mut state = self.state.lock();
        let id = match record.id {
            Some(id) => id,
            None => state.allocate_record_id(),
        };
        record.id = Some(id);
        state
            .tables
            .entry(record.table.clone())
            .or_default()
            .insert(id, record);
        id
    }

    /// Simulates a concurrent writer bumping the version of a committed record.
    ///
    /// Returns false if the record does not exist.
    pub fn touch(&self, table: &str, id: RecordId) -> bool {
        let mut state = self.state.lock();
        match state.tables.get_mut(table).and_then(|rows| rows.get_mut(&id)) {
            Some(record) => {
                record.version += 1;
                true
            }
            None => false,
        }
    }

    /// Returns a committed record.
    #[must_use]
    pub fn record(&self, table: &str, id: RecordId) -> Option<Record> {
        self.state.lock().committed(table, id).cloned()
    }

    /// Returns every committed record of a table, ordered by id.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every statement executed so far.
    #[must_use]
    pub fn statements(&self) -> Vec<StatementRecord> {
        self.state.lock().statements.clone()
    }

    /// Forgets recorded statements.
    pub fn clear_statements(&self) {
        self.state.lock().statements.clear();
    }

    /// Returns the driver counters.
    #[must_use]
    pub fn stats(&self) -> DriverStats {
        self.state.lock().stats
    }

    /// Returns the current target of a physical connection.
    #[must_use]
    pub fn target_of(&self, connection: ConnectionId) -> String {
        self.state
            .lock()
            .targets
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }
}

impl SessionFactory for InMemoryDatabase {
    fn open_session(&self) -> DriverResult<Box<dyn OrmSession>> {
        let mut state = self.state.lock();
        if let Some(error) = state.faults.open.pop_front() {
            return Err(error);
        }

        let physical = match state.idle_connections.pop() {
            Some(id) => id,
            None => {
                let id = ConnectionId::new(state.next_connection_id);
                state.next_connection_id += 1;
                id
            }
        };
        let handle = ConnectionId::new(state.next_handle_id);
        state.next_handle_id += 1;
        state.stats.sessions_opened += 1;
        drop(state);

        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            connection: InMemoryConnection {
                state: Arc::clone(&self.state),
                handle,
                physical,
                suppressed: CheckSet::empty(),
            },
            transaction_active: false,
            default_read_only: false,
            flush_mode: FlushMode::Auto,
            pending: Vec::new(),
            flushed: Vec::new(),
            closed: false,
        }))
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Insert(Record),
    Update(Record),
    Delete { table: String, id: RecordId },
}

impl PendingWrite {
    fn key(&self) -> (&str, Option<RecordId>) {
        match self {
            PendingWrite::Insert(record) | PendingWrite::Update(record) => {
                (record.table.as_str(), record.id)
            }
            PendingWrite::Delete { table, id } => (table.as_str(), Some(*id)),
        }
    }
}

/// A session of an [`InMemoryDatabase`].
#[derive(Debug)]
pub struct InMemorySession {
    state: Arc<Mutex<State>>,
    connection: InMemoryConnection,
    transaction_active: bool,
    default_read_only: bool,
    flush_mode: FlushMode,
    pending: Vec<PendingWrite>,
    flushed: Vec<PendingWrite>,
    closed: bool,
}

impl InMemorySession {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_active(&self) -> DriverResult<()> {
        self.ensure_open()?;
        if !self.transaction_active {
            return Err(DriverError::NoActiveTransaction);
        }
        Ok(())
    }

    fn validate(state: &State, flushed: &[PendingWrite], write: &PendingWrite) -> DriverResult<()> {
        let (table, id) = match write {
            PendingWrite::Insert(_) => return Ok(()),
            PendingWrite::Update(record) => (record.table.as_str(), record.id),
            PendingWrite::Delete { table, id } => (table.as_str(), Some(*id)),
        };
        let id = id.ok_or_else(|| DriverError::sql(format!("{table} row has no id")))?;

        // A row inserted earlier in this transaction has no committed version yet.
        let inserted_here = flushed
            .iter()
            .any(|w| matches!(w, PendingWrite::Insert(_)) && w.key() == (table, Some(id)));
        if inserted_here {
            return Ok(());
        }

        let stored = state.committed(table, id).ok_or_else(|| DriverError::StaleObject {
            table: table.to_string(),
            id,
        })?;
        if let PendingWrite::Update(record) = write {
            if stored.version != record.version {
                return Err(DriverError::OptimisticLock {
                    table: table.to_string(),
                    id,
                    expected: record.version,
                    actual: stored.version,
                });
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transaction_active = false;
        self.pending.clear();
        self.flushed.clear();

        let mut state = self.state.lock();
        state.stats.sessions_closed += 1;
        // Pooled connections come back untargeted.
        state.targets.remove(&self.connection.physical);
        if state.reuse_connections {
            state.idle_connections.push(self.connection.physical);
        }
    }
}

impl OrmSession for InMemorySession {
    fn begin_transaction(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.transaction_active {
            return Err(DriverError::TransactionAlreadyActive);
        }
        let mut state = self.state.lock();
        if let Some(error) = state.faults.begin.pop_front() {
            return Err(error);
        }
        state.stats.begins += 1;
        self.transaction_active = true;
        Ok(())
    }

    fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.ensure_active()?;
        if let Some(error) = self.state.lock().faults.commit.pop_front() {
            return Err(error);
        }
        match self.flush_mode {
            FlushMode::Auto => self.flush()?,
            FlushMode::Manual => self.pending.clear(),
        }

        // Another session may have committed since our flush.
        let mut state = self.state.lock();
        for write in &self.flushed {
            Self::validate(&state, &self.flushed, write)?;
        }
        for write in self.flushed.drain(..) {
            match write {
                PendingWrite::Insert(record) => {
                    if let Some(id) = record.id {
                        state
                            .tables
                            .entry(record.table.clone())
                            .or_default()
                            .insert(id, record);
                    }
                }
                PendingWrite::Update(mut record) => {
                    if let Some(id) = record.id {
                        record.version += 1;
                        state
                            .tables
                            .entry(record.table.clone())
                            .or_default()
                            .insert(id, record);
                    }
                }
                PendingWrite::Delete { table, id } => {
                    if let Some(rows) = state.tables.get_mut(&table) {
                        rows.remove(&id);
                    }
                }
            }
        }
        state.stats.commits += 1;
        self.transaction_active = false;
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_active()?;
        self.transaction_active = false;
        self.pending.clear();
        self.flushed.clear();

        let mut state = self.state.lock();
        state.stats.rollbacks += 1;
        match state.faults.rollback.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> DriverResult<()> {
        self.ensure_active()?;
        let mut state = self.state.lock();
        if let Some(error) = state.faults.flush.pop_front() {
            return Err(error);
        }
        for write in &self.pending {
            Self::validate(&state, &self.flushed, write)?;
        }
        self.flushed.append(&mut self.pending);
        state.stats.flushes += 1;
        Ok(())
    }

    fn set_default_read_only(&mut self, read_only: bool) {
        self.default_read_only = read_only;
    }

    fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    fn set_suppressed_checks(&mut self, checks: CheckSet) {
        self.connection.suppressed = checks;
    }

    fn get(&mut self, table: &str, id: RecordId) -> DriverResult<Option<Record>> {
        self.ensure_open()?;
        let mut current = self.state.lock().committed(table, id).cloned();
        for write in self.flushed.iter().chain(self.pending.iter()) {
            if write.key() != (table, Some(id)) {
                continue;
            }
            current = match write {
                PendingWrite::Insert(record) | PendingWrite::Update(record) => Some(record.clone()),
                PendingWrite::Delete { .. } => None,
            };
        }
        Ok(current)
    }

    fn save(&mut self, record: &Record) -> DriverResult<RecordId> {
        self.ensure_open()?;
        if let Some(id) = record.id {
            return Err(DriverError::ConstraintViolation(format!(
                "{} row {id} is already persistent",
                record.table
            )));
        }
        let id = self.state.lock().allocate_record_id();
        let mut record = record.clone();
        record.id = Some(id);
        self.pending.push(PendingWrite::Insert(record));
        Ok(id)
    }

    fn update(&mut self, record: &Record) -> DriverResult<()> {
        self.ensure_open()?;
        if record.id.is_none() {
            return Err(DriverError::sql(format!(
                "cannot update transient {} row",
                record.table
            )));
        }
        if self.default_read_only {
            self.state.lock().stats.ignored_updates += 1;
            return Ok(());
        }
        self.pending.push(PendingWrite::Update(record.clone()));
        Ok(())
    }

    fn delete(&mut self, table: &str, id: RecordId) -> DriverResult<()> {
        self.ensure_open()?;
        self.pending.push(PendingWrite::Delete {
            table: table.to_string(),
            id,
        });
        Ok(())
    }

    fn connection(&mut self) -> DriverResult<&mut dyn Connection> {
        self.ensure_open()?;
        Ok(&mut self.connection)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

/// A connection handle of an [`InMemoryDatabase`].
#[derive(Debug)]
pub struct InMemoryConnection {
    state: Arc<Mutex<State>>,
    handle: ConnectionId,
    physical: ConnectionId,
    suppressed: CheckSet,
}

impl InMemoryConnection {
    fn log(&self, state: &mut State, sql: &str) {
        let target = state.targets.get(&self.physical).cloned().unwrap_or_default();
        state.statements.push(StatementRecord {
            connection: self.physical,
            sql: sql.to_string(),
            suppressed: self.suppressed,
            target,
        });
    }
}

impl Connection for InMemoryConnection {
    fn id(&self) -> ConnectionId {
        self.handle
    }

    fn physical_id(&self) -> ConnectionId {
        self.physical
    }

    fn execute(&mut self, sql: &str) -> DriverResult<u64> {
        let mut state = self.state.lock();
        self.log(&mut state, sql);

        let trimmed = sql.trim();
        let Some(rest) = trimmed.strip_prefix("USE") else {
            return Ok(0);
        };
        if matches!(state.layout, ClusterLayout::Unsharded) {
            return Err(DriverError::sql(format!("unknown database in '{trimmed}'")));
        }
        let target = rest.trim().trim_matches('`').to_string();
        if target.is_empty() {
            state.targets.remove(&self.physical);
        } else {
            state.targets.insert(self.physical, target);
        }
        Ok(0)
    }

    fn query(&mut self, sql: &str) -> DriverResult<Vec<Vec<String>>> {
        let mut state = self.state.lock();
        self.log(&mut state, sql);

        let statement = sql.trim();
        let shards = match &state.layout {
            ClusterLayout::Sharded { shards } => shards.clone(),
            ClusterLayout::Unsharded => {
                if statement == SHOW_SHARDS || statement == SHOW_TARGET {
                    return Err(DriverError::sql(format!(
                        "syntax error near '{statement}'"
                    )));
                }
                return Ok(Vec::new());
            }
        };

        if statement == SHOW_SHARDS {
            let listing = state.faults.shard_listings.pop_front().unwrap_or(shards);
            return Ok(listing.into_iter().map(|s| vec![s]).collect());
        }
        if statement == SHOW_TARGET {
            let target = state.targets.get(&self.physical).cloned().unwrap_or_default();
            return Ok(vec![vec![target]]);
        }
        Ok(Vec::new())
    }
}
