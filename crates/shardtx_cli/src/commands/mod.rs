//! CLI command implementations.

pub mod shards;
pub mod simulate;
