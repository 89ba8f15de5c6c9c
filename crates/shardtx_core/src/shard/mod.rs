//! Shards of a horizontally partitioned cluster.
//!
//! A sharded backend reports its shards through a metadata query and lets a
//! connection be routed to one shard at a time. Backends that are not
//! sharded present a single fixed shard, so callers can treat both alike.

mod directory;
mod model;

pub(crate) use directory::{in_keyspace, with_target};
pub use directory::{directory_for, ShardDirectory, SingleShardDirectory, VitessShardDirectory};
pub use model::{
    single_shard_set, KeyRange, Keyspace, Shard, ShardSet, SINGLE_KEYSPACE, SINGLE_SHARD,
};
