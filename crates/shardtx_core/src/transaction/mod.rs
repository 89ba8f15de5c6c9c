//! Transactions with retries, lifecycle hooks and nesting detection.
//!
//! - [`Transacter`] runs a closure inside a transaction and retries it on
//!   transient failures
//! - [`Session`] is what the closure sees for one attempt
//! - [`SessionRegistry`] tracks the active session of each thread

mod hooks;
mod registry;
mod session;
mod transacter;

pub use hooks::Hook;
pub use registry::SessionRegistry;
pub use session::Session;
pub use transacter::{Transacter, TransacterBuilder};
