#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **larder-postgres** – PostgreSQL storage driver for Larder.
//!
//! The server-backed sibling of the SQLite driver: same table shape, same
//! statement contract, PostgreSQL dialect. Connection strings are standard
//! `postgres://` URLs handed to the sqlx pool.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use larder_core::{CacheStore, EntryRow, ExpiryFilter, ParentKeys};

pub mod statements;

/// Length cap for partitions, matching the `VARCHAR(255)` columns.
pub const MAX_PARTITION_LEN: usize = 255;
/// Length cap for keys and parent keys.
pub const MAX_KEY_LEN: usize = 255;

/// Connections kept by the pool; cache traffic is short transactions.
const MAX_POOL_CONNECTIONS: u32 = 10;

const PARENT_KEY_COLUMNS: [&str; 5] = [
    "parent_key_0",
    "parent_key_1",
    "parent_key_2",
    "parent_key_3",
    "parent_key_4",
];

/// A persistent cache store backed by a PostgreSQL database.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to `url` and bootstraps the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, bootstrapping the schema if necessary.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
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

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn entry_from_row(row: &PgRow) -> EntryRow {
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
impl CacheStore for PostgresStore {
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

        let expired = sqlx::query(statements::PEEK_ENTRIES)
            .bind(partition)
            .bind(ExpiryFilter::Expired.mode())
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;
        for row in expired.iter().map(entry_from_row) {
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
