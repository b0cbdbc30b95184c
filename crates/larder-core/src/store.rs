//! The storage contract drivers implement.
//!
//! One method per pre-composed statement in a driver's statement bank; the
//! engine never sees SQL. Cascade semantics live inside the delete
//! operations: deleting a key also deletes every entry whose parent-key set
//! contains that key, transitively, terminating even on parent-key cycles.

use async_trait::async_trait;

use crate::entry::EntryRow;

/// Expiry visibility of a row-set operation at time `now`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpiryFilter {
    /// Only rows with `utc_expiry >= now`.
    Live,
    /// Only rows with `utc_expiry < now`.
    Expired,
    /// Every row regardless of expiry.
    All,
}

impl ExpiryFilter {
    /// Wire encoding used as a statement parameter by the SQL dialects.
    pub fn mode(self) -> i64 {
        match self {
            ExpiryFilter::Live => 0,
            ExpiryFilter::Expired => 1,
            ExpiryFilter::All => 2,
        }
    }

    /// Whether `utc_expiry` passes this filter at `now`.
    pub fn admits(self, utc_expiry: i64, now: i64) -> bool {
        match self {
            ExpiryFilter::Live => utc_expiry >= now,
            ExpiryFilter::Expired => utc_expiry < now,
            ExpiryFilter::All => true,
        }
    }
}

/// Dialect-encapsulating storage backend for cache entries.
///
/// Implementations own connection acquisition, transactions and their
/// statement bank. All operations are atomic per call; `upsert_entry` and
/// the delete operations run inside a transaction. Methods surface
/// `anyhow::Result`; the engine maps failures into its error taxonomy.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Truncation cap the engine applies to partitions before binding.
    fn max_partition_len(&self) -> usize;

    /// Truncation cap the engine applies to keys and parent keys.
    fn max_key_len(&self) -> usize;

    /// Whether this backend supports reads that do not touch expiry.
    fn can_peek(&self) -> bool {
        true
    }

    /// Inserts or replaces the row with `row`'s primary identity.
    async fn upsert_entry(&self, row: &EntryRow) -> anyhow::Result<()>;

    /// Fetches one full row, `filter` deciding whether an expired row is
    /// visible.
    async fn peek_entry(
        &self,
        partition: &str,
        key: &str,
        filter: ExpiryFilter,
        now: i64,
    ) -> anyhow::Result<Option<EntryRow>>;

    /// Fetches the rows of `partition` (or the whole store) passing
    /// `filter`, without touching expiry.
    async fn peek_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> anyhow::Result<Vec<EntryRow>>;

    /// The batched get: inside one transaction, reads the candidate rows of
    /// `partition` (or the whole store), cascade-deletes the expired ones,
    /// extends the sliding survivors to `now + interval`, commits, and
    /// returns the surviving rows with their extended expiry.
    async fn touch_entries(
        &self,
        partition: Option<&str>,
        now: i64,
    ) -> anyhow::Result<Vec<EntryRow>>;

    /// Whether a live entry exists for `(partition, key)` at `now`.
    async fn contains_entry(&self, partition: &str, key: &str, now: i64) -> anyhow::Result<bool>;

    /// Counts rows of `partition` (or the whole store) passing `filter`.
    async fn count_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> anyhow::Result<u64>;

    /// Cascade-deletes `(partition, key)` and every transitive dependent.
    /// Returns the number of rows removed; 0 when nothing matched.
    async fn delete_entry(&self, partition: &str, key: &str) -> anyhow::Result<u64>;

    /// Cascade-deletes every row of `partition` (or the whole store)
    /// passing `filter`, seeding the cascade with the matching rows.
    /// Returns the number of rows removed.
    async fn delete_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> anyhow::Result<u64>;

    /// Raises the expiry of `(partition, key)` to `utc_expiry` if that is
    /// later than the stored instant; racing extensions keep the larger
    /// value.
    async fn update_entry_expiry(
        &self,
        partition: &str,
        key: &str,
        utc_expiry: i64,
    ) -> anyhow::Result<()>;

    /// Sum of payload lengths in `partition` (or the whole store).
    async fn cache_size_bytes(&self, partition: Option<&str>) -> anyhow::Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_admission_matches_liveness() {
        assert!(ExpiryFilter::Live.admits(100, 100));
        assert!(!ExpiryFilter::Live.admits(99, 100));
        assert!(ExpiryFilter::Expired.admits(99, 100));
        assert!(!ExpiryFilter::Expired.admits(100, 100));
        assert!(ExpiryFilter::All.admits(0, i64::MAX));
    }

    #[test]
    fn wire_modes_are_distinct() {
        assert_eq!(ExpiryFilter::Live.mode(), 0);
        assert_eq!(ExpiryFilter::Expired.mode(), 1);
        assert_eq!(ExpiryFilter::All.mode(), 2);
    }
}
