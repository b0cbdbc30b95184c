#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **larder-sqlite** – SQLite storage driver for Larder.
//!
//! A reliable, portable backend over `sqlx`. One logical table holds the
//! cache entries; the statement bank lives in [`statements`] and cascade
//! deletes run as recursive CTEs inside the database.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use larder_core::{CacheStore, EntryRow, ExpiryFilter, ParentKeys};

pub mod statements;

/// Length cap for partitions, applied by the engine before binding.
pub const MAX_PARTITION_LEN: usize = 255;
/// Length cap for keys and parent keys.
pub const MAX_KEY_LEN: usize = 255;

/// Pool size for file-backed databases. The cache is the only writer, so
/// this only serves internal task concurrency.
const MAX_POOL_CONNECTIONS: u32 = 5;

const PARENT_KEY_COLUMNS: [&str; 5] = [
    "parent_key_0",
    "parent_key_1",
    "parent_key_2",
    "parent_key_3",
    "parent_key_4",
];

/// A persistent cache store backed by a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates a database file at `path` and bootstraps the schema.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Opens a volatile in-memory database.
    ///
    /// The pool is pinned to a single never-recycled connection: each SQLite
    /// `:memory:` connection is its own database, so handing out a second
    /// one would expose an empty schema.
    pub async fn open_in_memory() -> Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, bootstrapping the schema if necessary.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(statements::CREATE_TABLE)
            .execute(&self.pool)
            .await?;
        for ddl in statements::CREATE_INDEXES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Reclaims file space, typically after a hard cleanup.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query(statements::VACUUM).execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn entry_from_row(row: &SqliteRow) -> EntryRow {
    let mut parent_keys = ParentKeys::new();
    for column in PARENT_KEY_COLUMNS {
        if let Some(parent) = row.get::<Option<String>, _>(column) {
            parent_keys.push(parent);
        }
    }
    EntryRow {
        partition: row.get("partition"),
        key: row.get("key"),
        utc_creation: row.get("utc_creation"),
        utc_expiry: row.get("utc_expiry"),
        interval: row.get("interval"),
        payload: row.get("payload"),
        compressed: row.get("compressed"),
        parent_keys,
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn max_partition_len(&self) -> usize {
        MAX_PARTITION_LEN
    }

    fn max_key_len(&self) -> usize {
        MAX_KEY_LEN
    }

    async fn upsert_entry(&self, row: &EntryRow) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(statements::UPSERT_ENTRY)
            .bind(&row.partition)
            .bind(&row.key)
            .bind(row.utc_creation)
            .bind(row.utc_expiry)
            .bind(row.interval)
            .bind(&row.payload)
            .bind(row.compressed)
            .bind(row.parent_keys.first().map(String::as_str))
            .bind(row.parent_keys.get(1).map(String::as_str))
            .bind(row.parent_keys.get(2).map(String::as_str))
            .bind(row.parent_keys.get(3).map(String::as_str))
            .bind(row.parent_keys.get(4).map(String::as_str))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn peek_entry(
        &self,
        partition: &str,
        key: &str,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<Option<EntryRow>> {
        let row = sqlx::query(statements::PEEK_ENTRY)
            .bind(partition)
            .bind(key)
            .bind(filter.mode())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entry_from_row))
    }

    async fn peek_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<Vec<EntryRow>> {
        let rows = sqlx::query(statements::PEEK_ENTRIES)
            .bind(partition)
            .bind(filter.mode())
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn touch_entries(&self, partition: Option<&str>, now: i64) -> Result<Vec<EntryRow>> {
        let mut tx = self.pool.begin().await?;

        let candidates = sqlx::query(statements::PEEK_ENTRIES)
            .bind(partition)
            .bind(ExpiryFilter::Expired.mode())
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;
        for row in candidates.iter().map(entry_from_row) {
            sqlx::query(statements::DELETE_ENTRY_SINGLE)
                .bind(&row.partition)
                .bind(&row.key)
                .execute(&mut *tx)
                .await?;
        }

        // Cascades above may have taken live dependents; read the survivors
        // before extending them.
        let survivor_rows = sqlx::query(statements::PEEK_ENTRIES)
            .bind(partition)
            .bind(ExpiryFilter::Live.mode())
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;
        let mut survivors: Vec<EntryRow> = survivor_rows.iter().map(entry_from_row).collect();
        for row in survivors.iter_mut() {
            if row.interval > 0 {
                let extended = now + row.interval;
                sqlx::query(statements::UPDATE_ENTRY_EXPIRY)
                    .bind(&row.partition)
                    .bind(&row.key)
                    .bind(extended)
                    .execute(&mut *tx)
                    .await?;
                row.utc_expiry = row.utc_expiry.max(extended);
            }
        }

        tx.commit().await?;
        Ok(survivors)
    }

    async fn contains_entry(&self, partition: &str, key: &str, now: i64) -> Result<bool> {
        let row = sqlx::query(statements::CONTAINS_ENTRY)
            .bind(partition)
            .bind(key)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn count_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<u64> {
        let row = sqlx::query(statements::COUNT_ENTRIES)
            .bind(partition)
            .bind(filter.mode())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn delete_entry(&self, partition: &str, key: &str) -> Result<u64> {
        let result = sqlx::query(statements::DELETE_ENTRY_SINGLE)
            .bind(partition)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<u64> {
        let result = sqlx::query(statements::DELETE_ENTRIES_GROUP)
            .bind(partition)
            .bind(filter.mode())
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_entry_expiry(
        &self,
        partition: &str,
        key: &str,
        utc_expiry: i64,
    ) -> Result<()> {
        sqlx::query(statements::UPDATE_ENTRY_EXPIRY)
            .bind(partition)
            .bind(key)
            .bind(utc_expiry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cache_size_bytes(&self, partition: Option<&str>) -> Result<u64> {
        let row = sqlx::query(statements::CACHE_SIZE_BYTES)
            .bind(partition)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(partition: &str, key: &str, expiry: i64, interval: i64, parents: &[&str]) -> EntryRow {
        EntryRow {
            partition: partition.to_string(),
            key: key.to_string(),
            utc_creation: 0,
            utc_expiry: expiry,
            interval,
            payload: vec![0xab; 16],
            compressed: false,
            parent_keys: parents.iter().map(|p| p.to_string()).collect::<ParentKeys>(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_identity() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "k", 100, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "k", 200, 60, &["p"])).await.unwrap();

        assert_eq!(
            store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
            1
        );
        let fetched = store
            .peek_entry("a", "k", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.utc_expiry, 200);
        assert_eq!(fetched.interval, 60);
        assert_eq!(fetched.parent_keys.as_slice(), ["p".to_string()]);
    }

    #[tokio::test]
    async fn round_trips_every_column() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut entry = row("orders", "o-1", 1_700_000_600, 600, &["c-1", "c-2", "c-3"]);
        entry.utc_creation = 1_700_000_000;
        entry.compressed = true;
        entry.payload = (0..=255u16).map(|b| b as u8).collect();
        store.upsert_entry(&entry).await.unwrap();

        let fetched = store
            .peek_entry("orders", "o-1", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, entry);
    }

    #[tokio::test]
    async fn expiry_filters_apply() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "live", 100, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "dead", 10, 0, &[])).await.unwrap();

        let now = 50;
        assert!(store
            .peek_entry("a", "dead", ExpiryFilter::Live, now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .peek_entries(Some("a"), ExpiryFilter::Live, now)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store.count_entries(None, ExpiryFilter::Expired, now).await.unwrap(),
            1
        );
        assert!(store.contains_entry("a", "live", now).await.unwrap());
        assert!(!store.contains_entry("a", "dead", now).await.unwrap());
        assert!(!store.contains_entry("a", "ghost", now).await.unwrap());
    }

    #[tokio::test]
    async fn delete_cascades_through_a_chain() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "t1", 1_000, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "t2", 1_000, 0, &["t1"])).await.unwrap();
        store.upsert_entry(&row("a", "t3", 1_000, 0, &["t2"])).await.unwrap();
        store.upsert_entry(&row("a", "k", 1_000, 0, &["t3"])).await.unwrap();

        assert_eq!(store.delete_entry("a", "t1").await.unwrap(), 4);
        assert_eq!(
            store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn delete_cascades_over_fan_out_within_the_partition() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "parent", 1_000, 0, &[])).await.unwrap();
        for i in 0..10 {
            store
                .upsert_entry(&row("a", &format!("child-{i}"), 1_000, 0, &["parent"]))
                .await
                .unwrap();
        }
        store.upsert_entry(&row("b", "parent", 1_000, 0, &[])).await.unwrap();

        assert_eq!(store.delete_entry("a", "parent").await.unwrap(), 11);
        assert_eq!(
            store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn delete_terminates_on_parent_cycles() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "x", 1_000, 0, &["y"])).await.unwrap();
        store.upsert_entry(&row("a", "y", 1_000, 0, &["x"])).await.unwrap();

        assert_eq!(store.delete_entry("a", "x").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn absent_delete_is_a_no_op() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.delete_entry("a", "ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_delete_of_expired_rows_takes_dependents() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "old-parent", 10, 0, &[])).await.unwrap();
        store
            .upsert_entry(&row("a", "fresh-child", 1_000, 0, &["old-parent"]))
            .await
            .unwrap();
        store.upsert_entry(&row("a", "fresh", 1_000, 0, &[])).await.unwrap();

        let removed = store
            .delete_entries(None, ExpiryFilter::Expired, 50)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.contains_entry("a", "fresh", 50).await.unwrap());
    }

    #[tokio::test]
    async fn hard_group_delete_respects_the_partition_scope() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "k1", 1_000, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "k2", 10, 0, &[])).await.unwrap();
        store.upsert_entry(&row("b", "k1", 1_000, 0, &[])).await.unwrap();

        let removed = store
            .delete_entries(Some("a"), ExpiryFilter::All, 50)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn touch_extends_sliding_rows_and_sweeps_expired_ones() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "sliding", 100, 600, &[])).await.unwrap();
        store.upsert_entry(&row("a", "timed", 100, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "dead", 10, 0, &[])).await.unwrap();

        let rows = store.touch_entries(Some("a"), 50).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["sliding", "timed"]);
        assert_eq!(rows[0].utc_expiry, 650);
        assert_eq!(rows[1].utc_expiry, 100);

        let stored = store
            .peek_entry("a", "sliding", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.utc_expiry, 650);
        assert!(store
            .peek_entry("a", "dead", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expiry_updates_keep_the_larger_instant() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "k", 500, 60, &[])).await.unwrap();

        store.update_entry_expiry("a", "k", 800).await.unwrap();
        store.update_entry_expiry("a", "k", 700).await.unwrap();

        let fetched = store
            .peek_entry("a", "k", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.utc_expiry, 800);
    }

    #[tokio::test]
    async fn size_sums_payload_lengths_per_scope() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "k1", 100, 0, &[])).await.unwrap();
        store.upsert_entry(&row("a", "k2", 100, 0, &[])).await.unwrap();
        store.upsert_entry(&row("b", "k1", 100, 0, &[])).await.unwrap();

        assert_eq!(store.cache_size_bytes(Some("a")).await.unwrap(), 32);
        assert_eq!(store.cache_size_bytes(None).await.unwrap(), 48);
        assert_eq!(store.cache_size_bytes(Some("zzz")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.upsert_entry(&row("a", "k", 100, 0, &["p"])).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let fetched = store
            .peek_entry("a", "k", ExpiryFilter::All, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.parent_keys.as_slice(), ["p".to_string()]);
    }

    #[tokio::test]
    async fn vacuum_runs_after_hard_cleanup() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_entry(&row("a", "k", 100, 0, &[])).await.unwrap();
        store
            .delete_entries(None, ExpiryFilter::All, 0)
            .await
            .unwrap();
        store.vacuum().await.unwrap();
    }
}
