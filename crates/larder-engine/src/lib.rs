#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **larder-engine** – Storage engine and public cache surface for Larder.
//!
//! The engine drives the item lifecycle over any [`larder_core::CacheStore`]
//! driver: the serialize → stamp → compress write path, the verify-and-decode
//! read path, timed/sliding/static expiration, cascading invalidation,
//! bounded retries, and opportunistic cleanup. [`PersistentCache`] is the
//! partition-scoped facade applications talk to.

pub mod cache;
pub mod cleanup;
pub mod engine;
pub mod retry;

pub use cache::{PartitionHandle, PersistentCache, PersistentCacheBuilder};
pub use cleanup::CleanupPolicy;
pub use engine::{Expiration, StorageEngine};
pub use retry::RetryExecutor;
