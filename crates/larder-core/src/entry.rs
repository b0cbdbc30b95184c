//! The persisted entry model.
//!
//! A cache entry is one row of the backing table, identified by
//! `(partition, key)`. The payload carries a 4-byte integrity stamp followed
//! by the serialized value, optionally wrapped in compression as a whole.

use smallvec::SmallVec;

/// Upper bound on parent keys per entry.
pub const MAX_PARENT_KEYS: usize = 5;

/// Parent keys of an entry, ascending-populated, at most [`MAX_PARENT_KEYS`].
///
/// Parent keys always belong to the entry's own partition. Removing any of
/// them cascades to this entry.
pub type ParentKeys = SmallVec<[String; MAX_PARENT_KEYS]>;

/// One row of the backing table.
///
/// `utc_creation`, `utc_expiry` and `interval` are integer seconds;
/// `interval == 0` means the entry never slides. An entry is live at time
/// `t` iff `t <= utc_expiry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRow {
    /// Namespace of the key, bounded by the driver's partition cap.
    pub partition: String,
    /// Key within the partition, bounded by the driver's key cap.
    pub key: String,
    /// Creation instant, seconds since the Unix epoch.
    pub utc_creation: i64,
    /// Expiry instant, seconds since the Unix epoch.
    pub utc_expiry: i64,
    /// Sliding interval in seconds; 0 disables sliding extension.
    pub interval: i64,
    /// Stamp prefix + serialized value, compressed as a whole when flagged.
    pub payload: Vec<u8>,
    /// Whether `payload` is compressed.
    pub compressed: bool,
    /// Keys in the same partition whose removal invalidates this entry.
    pub parent_keys: ParentKeys,
}

impl EntryRow {
    /// Borrowed metadata view used for stamping and verification.
    pub fn metadata(&self) -> EntryMetadata<'_> {
        EntryMetadata {
            partition: &self.partition,
            key: &self.key,
            utc_creation: self.utc_creation,
            utc_expiry: self.utc_expiry,
            interval: self.interval,
            parent_keys: &self.parent_keys,
        }
    }

    /// Whether the entry is live at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        now <= self.utc_expiry
    }

    /// Whether a successful read re-stamps the expiry.
    pub fn is_sliding(&self) -> bool {
        self.interval > 0
    }
}

/// The identity-plus-metadata tuple an entry is stamped over.
///
/// Everything the engine trusts for routing and expiration decisions,
/// borrowed from the row being written or verified.
#[derive(Clone, Copy, Debug)]
pub struct EntryMetadata<'a> {
    /// Entry partition.
    pub partition: &'a str,
    /// Entry key.
    pub key: &'a str,
    /// Creation instant, seconds since the Unix epoch.
    pub utc_creation: i64,
    /// Expiry instant, seconds since the Unix epoch.
    pub utc_expiry: i64,
    /// Sliding interval in seconds.
    pub interval: i64,
    /// Parent keys, ascending-populated.
    pub parent_keys: &'a [String],
}

/// A decoded entry returned by the item-level read operations.
///
/// Carries the value together with the row metadata observed at read time.
/// For sliding entries the expiry reflects the extension performed by the
/// read that produced this item.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheItem<T> {
    /// Entry partition.
    pub partition: String,
    /// Entry key.
    pub key: String,
    /// The decoded value.
    pub value: T,
    /// Creation instant, seconds since the Unix epoch.
    pub utc_creation: i64,
    /// Expiry instant, seconds since the Unix epoch.
    pub utc_expiry: i64,
    /// Sliding interval in seconds; 0 for timed entries.
    pub interval: i64,
    /// Parent keys of the entry.
    pub parent_keys: ParentKeys,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(expiry: i64, interval: i64) -> EntryRow {
        EntryRow {
            partition: "p".to_string(),
            key: "k".to_string(),
            utc_creation: 100,
            utc_expiry: expiry,
            interval,
            payload: vec![1, 2, 3],
            compressed: false,
            parent_keys: ParentKeys::new(),
        }
    }

    #[test]
    fn liveness_is_inclusive_of_the_expiry_instant() {
        let entry = row(200, 0);
        assert!(entry.is_live(199));
        assert!(entry.is_live(200));
        assert!(!entry.is_live(201));
    }

    #[test]
    fn sliding_requires_positive_interval() {
        assert!(!row(200, 0).is_sliding());
        assert!(row(200, 600).is_sliding());
    }

    #[test]
    fn metadata_borrows_row_fields() {
        let mut entry = row(200, 600);
        entry.parent_keys.push("parent".to_string());
        let meta = entry.metadata();
        assert_eq!(meta.partition, "p");
        assert_eq!(meta.key, "k");
        assert_eq!(meta.utc_expiry, 200);
        assert_eq!(meta.parent_keys, ["parent".to_string()]);
    }
}
