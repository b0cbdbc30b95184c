//! Anti-tamper stamping of payload envelopes.
//!
//! Every payload starts with a 32-bit stamp over the row's identity and
//! metadata, not over the serialized bytes. A mismatch on read means the row
//! was edited or copy-pasted out-of-band and must not be returned.
//!
//! The stamp covers the stable subset of the metadata: partition, key,
//! creation instant, interval and parent keys. The expiry instant is covered
//! only for timed entries (`interval == 0`); a sliding entry's expiry is
//! legitimately re-stamped by every successful read without rewriting the
//! payload.

use std::io::{Read, Write};

use crate::entry::EntryMetadata;
use crate::error::{CacheError, CacheResult};

/// Width of the stamp prefix in bytes.
pub const STAMP_LEN: usize = 4;

/// Computes the 32-bit stamp for `meta`.
pub fn stamp(meta: &EntryMetadata<'_>) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(meta.partition.as_bytes());
    hasher.update(&[0]);
    hasher.update(meta.key.as_bytes());
    hasher.update(&[0]);
    hasher.update(&meta.utc_creation.to_le_bytes());
    if meta.interval == 0 {
        hasher.update(&meta.utc_expiry.to_le_bytes());
    }
    hasher.update(&meta.interval.to_le_bytes());
    for parent in meta.parent_keys {
        hasher.update(parent.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; STAMP_LEN];
    prefix.copy_from_slice(&digest.as_bytes()[..STAMP_LEN]);
    u32::from_le_bytes(prefix)
}

/// Writes the stamp prefix for `meta` into `writer`.
pub fn write_stamp<W: Write>(mut writer: W, meta: &EntryMetadata<'_>) -> std::io::Result<()> {
    writer.write_all(&stamp(meta).to_le_bytes())
}

/// Reads the stamp prefix from `reader` and compares it against `meta`.
///
/// A short read counts as tampering: the envelope was truncated.
pub fn read_and_verify<R: Read>(mut reader: R, meta: &EntryMetadata<'_>) -> CacheResult<()> {
    let mut prefix = [0u8; STAMP_LEN];
    let tamper = || CacheError::TamperDetected {
        partition: meta.partition.to_string(),
        key: meta.key.to_string(),
    };
    reader.read_exact(&mut prefix).map_err(|_| tamper())?;
    if u32::from_le_bytes(prefix) != stamp(meta) {
        return Err(tamper());
    }
    Ok(())
}
