//! Generation-based response cache for offline support.
//!
//! This module provides the storage side of the offline controller:
//! - Named, versioned generations (shell and dynamic) holding response snapshots
//! - Entries keyed by normalized request (method + URL without fragment)
//! - Atomic batch writes for the install-time shell
//! - Whole-generation eviction on activation
//! - Lifecycle bookkeeping so separate processes agree on the active version

mod entry;
mod generation;
mod layer;
mod storage;

pub use entry::{RequestKey, ResponseSource};
pub use generation::{CacheGeneration, GenerationKind, GenerationNames};
pub use layer::CacheLayer;
#[cfg(test)]
pub use entry::StoredResponse;
#[cfg(test)]
pub use storage::{BrokenStorage, MemoryStorage};
pub use storage::{CacheStorage, SqliteStorage};
