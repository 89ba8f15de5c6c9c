//! # shardtx driver
//!
//! ORM session and connection contracts for shardtx.
//!
//! This crate is the boundary between the transaction engine and whatever
//! actually talks to the database. The engine never interprets SQL or maps
//! objects itself; it drives an [`OrmSession`] through begin, flush, commit
//! and rollback, and reaches the raw [`Connection`] only for shard metadata.
//!
//! ## Contracts
//!
//! - [`SessionFactory`] opens one [`OrmSession`] per transaction attempt
//! - [`OrmSession`] defers writes until flush and reports conflicts as
//!   specific [`DriverError`] kinds
//! - [`Connection`] runs statements and exposes a stable physical identity
//!
//! ## Available Drivers
//!
//! - [`InMemoryDatabase`] - For testing, with a simulated sharded cluster
//!
//! ## Example
//!
//! ```rust
//! use shardtx_driver::{InMemoryDatabase, SessionFactory};
//!
//! let db = InMemoryDatabase::sharded(["commerce/-80", "commerce/80-"]);
//! let mut session = db.open_session().unwrap();
//! let rows = session.connection().unwrap().query("SHOW VITESS_SHARDS").unwrap();
//! assert_eq!(rows.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod check;
mod error;
mod memory;
mod record;

pub use backend::{Connection, ConnectionId, FlushMode, OrmSession, SessionFactory};
pub use check::{Check, CheckSet};
pub use error::{DriverError, DriverResult};
pub use memory::{
    ClusterLayout, DriverStats, InMemoryConnection, InMemoryDatabase, InMemorySession,
    StatementRecord,
};
pub use record::{EntityGroup, Record, RecordId};
