#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **larder-core** – Core caching abstractions for Larder.
//!
//! This crate defines the entry model, the error taxonomy, and the
//! collaborator contracts the cache engine is polymorphic over: a clock, a
//! random source, a serializer, a compressor, and the [`CacheStore`] storage
//! contract. It contains no concrete storage driver.
//!
//! Drivers (SQLite, PostgreSQL, in-memory, etc.) implement [`CacheStore`] in
//! separate crates that depend on this core abstraction; the engine crate
//! composes a driver with the remaining collaborators into a cache.

pub mod clock;
pub mod codec;
pub mod compress;
pub mod config;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod random;
pub mod store;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use codec::{MessagePackSerializer, Serializer};
pub use compress::{Compressor, CompressorSink, DeflateCompressor};
pub use config::CacheConfig;
pub use entry::{CacheItem, EntryMetadata, EntryRow, ParentKeys, MAX_PARENT_KEYS};
pub use error::{CacheError, CacheResult};
pub use random::{FixedRandom, RandomSource, ThreadRandom};
pub use store::{CacheStore, ExpiryFilter};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        CacheConfig, CacheError, CacheItem, CacheResult, CacheStore, Clock, Compressor,
        EntryMetadata, EntryRow, ExpiryFilter, MessagePackSerializer, ParentKeys, RandomSource,
        Serializer, SystemClock, MAX_PARENT_KEYS,
    };
}
