//! State storage for Grind.
//!
//! The escalation controller's iteration counters are persisted through
//! the `StateStore` trait, with file-based and in-memory backends.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::{FileStateStore, DEFAULT_SESSION_ID};
pub use memory::MemoryStateStore;
pub use traits::StateStore;
