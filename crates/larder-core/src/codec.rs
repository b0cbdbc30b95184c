//! Value serialization.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, CacheResult};

/// Bidirectional value ↔ byte-stream codec.
///
/// The encoding must be self-describing enough to round-trip ordinary
/// aggregate shapes (sequences, maps, tuples, nested records, byte arrays,
/// unix-range integers, finite floats, arbitrary Unicode strings). Stability
/// across codec versions is not required; the integrity stamp covers row
/// metadata, never the serialized bytes.
pub trait Serializer: Send + Sync {
    /// Appends the encoding of `value` to `sink`.
    fn write<W: Write, T: Serialize + ?Sized>(&self, sink: W, value: &T) -> CacheResult<()>;

    /// Consumes one encoded value from `source`.
    fn read<R: Read, T: DeserializeOwned>(&self, source: R) -> CacheResult<T>;
}

/// MessagePack codec with named struct fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn write<W: Write, T: Serialize + ?Sized>(&self, mut sink: W, value: &T) -> CacheResult<()> {
        rmp_serde::encode::write_named(&mut sink, value)
            .map_err(|e| CacheError::InvalidValue(e.to_string()))
    }

    fn read<R: Read, T: DeserializeOwned>(&self, source: R) -> CacheResult<T> {
        rmp_serde::decode::from_read(source).map_err(|e| CacheError::InvalidValue(e.to_string()))
    }
}
