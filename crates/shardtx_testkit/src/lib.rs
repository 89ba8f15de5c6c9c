//! # shardtx testkit
//!
//! Test utilities for shardtx.
//!
//! This crate provides:
//! - Test fixtures: in-memory clusters with a transacter wired in and a
//!   sleeper that records delays instead of waiting
//! - Property-based test generators using proptest
//! - Scenario helpers for retries and shard targeting
//! - Concurrent stress tests
//!
//! ## Usage
//!
//! ```rust
//! use shardtx_testkit::prelude::*;
//! use shardtx_core::CoreError;
//!
//! let cluster = TestCluster::unsharded().with_options(fast_retries(3));
//! let (attempts, body) = failing_first(2, || CoreError::retry("conflict"));
//! assert_eq!(cluster.transaction(body).unwrap(), 3);
//! assert_eq!(attempts.get(), 3);
//! assert_eq!(cluster.sleeper.count(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
