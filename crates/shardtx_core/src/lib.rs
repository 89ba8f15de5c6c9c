//! # shardtx core
//!
//! Retrying, shard-aware transaction engine.
//!
//! This crate provides:
//! - [`Transacter`] to run closures inside transactions with retries
//! - [`Session`] with lifecycle hooks, scoped check suppression and shard
//!   targeting
//! - Error classification deciding which failures are retried
//! - Exponential backoff with jitter between attempts
//! - Shard discovery for sharded backends
//!
//! ## Example
//!
//! ```rust
//! use shardtx_core::{BackendType, DataSourceConfig, Transacter};
//! use shardtx_driver::InMemoryDatabase;
//! use std::sync::Arc;
//!
//! let db = InMemoryDatabase::sharded(["commerce/-80", "commerce/80-"]);
//! let transacter = Transacter::new(
//!     Arc::new(db),
//!     DataSourceConfig::new("commerce", BackendType::Vitess),
//! );
//!
//! let shards = transacter.transaction(|session| session.shards()).unwrap();
//! assert_eq!(shards.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod error;
mod retry;
pub mod shard;
mod transaction;

pub use backoff::{ExponentialBackoff, Sleeper, ThreadSleeper};
pub use config::{BackendType, DataSourceConfig, TransacterOptions};
pub use error::{CoreError, CoreResult};
pub use retry::is_retryable;
pub use shard::{KeyRange, Keyspace, Shard, ShardDirectory, ShardSet};
pub use transaction::{Hook, Session, SessionRegistry, Transacter, TransacterBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
