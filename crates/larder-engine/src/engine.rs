//! The item state machine over a [`CacheStore`] driver.
//!
//! Write path: stamp + serialize into one buffer, compress the whole
//! envelope past the configured threshold, upsert under retry, then maybe
//! sweep. Read path: fetch ignoring expiry, drop or extend per the entry's
//! state, then decompress, verify the stamp and deserialize; any decode
//! failure removes the row and reads as absent.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use larder_core::{
    envelope, CacheConfig, CacheError, CacheItem, CacheResult, CacheStore, Clock, Compressor,
    EntryMetadata, EntryRow, ExpiryFilter, ParentKeys, RandomSource, Serializer,
};

use crate::cleanup::CleanupPolicy;
use crate::retry::RetryExecutor;

/// How an upsert derives the entry's expiry.
#[derive(Clone, Copy, Debug)]
pub enum Expiration {
    /// Fixed expiry instant supplied by the caller; never slides.
    Timed {
        /// Expiry, seconds since the Unix epoch.
        utc_expiry: i64,
    },
    /// Expiry starts at `now + interval` and is re-stamped to that on every
    /// successful get.
    Sliding {
        /// Sliding interval in seconds; positive.
        interval: i64,
    },
}

/// The storage engine, polymorphic over its collaborators.
///
/// Most applications use it through
/// [`PersistentCache`](crate::cache::PersistentCache), which adds argument
/// validation and the error-trapping policy on top.
pub struct StorageEngine<S, Ser, Comp, Clk, Rng> {
    store: S,
    serializer: Ser,
    compressor: Comp,
    clock: Clk,
    random: Rng,
    config: CacheConfig,
    cleanup: CleanupPolicy,
    retry: RetryExecutor,
}

/// Clips `value` to at most `cap` bytes on a character boundary.
fn clip(value: &str, cap: usize) -> &str {
    if value.len() <= cap {
        return value;
    }
    let mut end = cap;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

impl<S, Ser, Comp, Clk, Rng> StorageEngine<S, Ser, Comp, Clk, Rng>
where
    S: CacheStore,
    Ser: Serializer,
    Comp: Compressor,
    Clk: Clock,
    Rng: RandomSource,
{
    /// Assembles an engine from its collaborators and a validated config.
    pub fn new(
        store: S,
        serializer: Ser,
        compressor: Comp,
        clock: Clk,
        random: Rng,
        config: CacheConfig,
    ) -> Self {
        let cleanup = CleanupPolicy::from_config(&config);
        Self {
            store,
            serializer,
            compressor,
            clock,
            random,
            config,
            cleanup,
            retry: RetryExecutor::default(),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether the driver supports reads that leave expiry untouched.
    pub fn can_peek(&self) -> bool {
        self.store.can_peek()
    }

    /// Inserts or replaces `(partition, key)`.
    pub async fn upsert<T>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        expiration: Expiration,
        parents: &[&str],
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let partition = clip(partition, self.store.max_partition_len());
        let key = clip(key, self.store.max_key_len());
        let now = self.clock.now_unix();
        let (utc_expiry, interval) = match expiration {
            Expiration::Timed { utc_expiry } => (utc_expiry, 0),
            Expiration::Sliding { interval } => (now.saturating_add(interval), interval),
        };
        let parent_keys: ParentKeys = parents
            .iter()
            .map(|p| clip(p, self.store.max_key_len()).to_string())
            .collect();
        let metadata = EntryMetadata {
            partition,
            key,
            utc_creation: now,
            utc_expiry,
            interval,
            parent_keys: &parent_keys,
        };

        let mut buffer = Vec::with_capacity(envelope::STAMP_LEN + 128);
        buffer.extend_from_slice(&envelope::stamp(&metadata).to_le_bytes());
        self.serializer.write(&mut buffer, value)?;

        let (payload, compressed) = if buffer.len() > self.config.min_value_length_for_compression
        {
            let mut sink = self.compressor.compress_stream(Vec::with_capacity(buffer.len() / 2));
            sink.write_all(&buffer)
                .map_err(|e| CacheError::StorageFailure(anyhow::Error::from(e)))?;
            let bytes = sink
                .finish()
                .map_err(|e| CacheError::StorageFailure(anyhow::Error::from(e)))?;
            (bytes, true)
        } else {
            (buffer, false)
        };

        let row = EntryRow {
            partition: partition.to_string(),
            key: key.to_string(),
            utc_creation: now,
            utc_expiry,
            interval,
            payload,
            compressed,
            parent_keys,
        };
        self.retry.run(|| self.store.upsert_entry(&row)).await?;

        self.maybe_sweep().await;
        Ok(())
    }

    /// Fetches and decodes `(partition, key)`, extending a sliding entry's
    /// expiry and dropping an expired one.
    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        let partition = clip(partition, self.store.max_partition_len());
        let key = clip(key, self.store.max_key_len());
        let now = self.clock.now_unix();

        let Some(mut row) = self
            .store
            .peek_entry(partition, key, ExpiryFilter::All, now)
            .await?
        else {
            return Ok(None);
        };

        if row.utc_expiry < now {
            if let Err(error) = self.store.delete_entry(partition, key).await {
                warn!(partition, key, %error, "failed to drop expired entry");
            }
            return Ok(None);
        }

        if row.interval > 0 {
            let extended = now.saturating_add(row.interval);
            match self.store.update_entry_expiry(partition, key, extended).await {
                Ok(()) => row.utc_expiry = row.utc_expiry.max(extended),
                Err(error) => {
                    warn!(partition, key, %error, "failed to extend sliding expiry");
                }
            }
        }

        self.decode(row).await
    }

    /// Fetches and decodes a live entry without touching its expiry.
    pub async fn peek<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        if !self.store.can_peek() {
            return Err(CacheError::NotSupported);
        }
        let partition = clip(partition, self.store.max_partition_len());
        let key = clip(key, self.store.max_key_len());
        let now = self.clock.now_unix();

        match self
            .store
            .peek_entry(partition, key, ExpiryFilter::Live, now)
            .await?
        {
            Some(row) => self.decode(row).await,
            None => Ok(None),
        }
    }

    /// The batched get over a partition or the whole store: one transaction
    /// sweeps the expired rows and extends the sliding survivors, then the
    /// survivors decode outside it.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        let partition = partition.map(|p| clip(p, self.store.max_partition_len()));
        let now = self.clock.now_unix();
        let rows = self.store.touch_entries(partition, now).await?;
        self.decode_all(rows).await
    }

    /// Batched peek of live entries; expiry untouched.
    pub async fn peek_many<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        if !self.store.can_peek() {
            return Err(CacheError::NotSupported);
        }
        let partition = partition.map(|p| clip(p, self.store.max_partition_len()));
        let now = self.clock.now_unix();
        let rows = self
            .store
            .peek_entries(partition, ExpiryFilter::Live, now)
            .await?;
        self.decode_all(rows).await
    }

    /// Whether a live entry exists; never extends.
    pub async fn contains(&self, partition: &str, key: &str) -> CacheResult<bool> {
        let partition = clip(partition, self.store.max_partition_len());
        let key = clip(key, self.store.max_key_len());
        let now = self.clock.now_unix();
        Ok(self.store.contains_entry(partition, key, now).await?)
    }

    /// Counts entries in scope through `filter`.
    pub async fn count(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
    ) -> CacheResult<u64> {
        let partition = partition.map(|p| clip(p, self.store.max_partition_len()));
        let now = self.clock.now_unix();
        Ok(self.store.count_entries(partition, filter, now).await?)
    }

    /// Cascade-removes `(partition, key)`; returns rows removed.
    pub async fn remove(&self, partition: &str, key: &str) -> CacheResult<u64> {
        let partition = clip(partition, self.store.max_partition_len());
        let key = clip(key, self.store.max_key_len());
        Ok(self.retry.run(|| self.store.delete_entry(partition, key)).await?)
    }

    /// Cascade-removes every row in scope passing `filter`.
    pub async fn clear(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
    ) -> CacheResult<u64> {
        let partition = partition.map(|p| clip(p, self.store.max_partition_len()));
        let now = self.clock.now_unix();
        Ok(self
            .retry
            .run(|| self.store.delete_entries(partition, filter, now))
            .await?)
    }

    /// Soft sweep: removes expired rows (and their dependents) in scope.
    pub async fn sweep_expired(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.clear(partition, ExpiryFilter::Expired).await
    }

    /// Sum of stored payload lengths in scope.
    pub async fn size_bytes(&self, partition: Option<&str>) -> CacheResult<u64> {
        let partition = partition.map(|p| clip(p, self.store.max_partition_len()));
        Ok(self.store.cache_size_bytes(partition).await?)
    }

    /// Post-insert cleanup trigger; failures never reach the caller.
    async fn maybe_sweep(&self) {
        if !self.cleanup.should_sweep(&self.random) {
            return;
        }
        match self.sweep_expired(None).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(removed, "opportunistic cleanup swept expired entries");
            }
            Ok(_) => {}
            Err(error) => warn!(%error, "opportunistic cleanup failed"),
        }
    }

    async fn decode_all<T: DeserializeOwned>(
        &self,
        rows: Vec<EntryRow>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(item) = self.decode(row).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Turns a row into an item; an undecodable row is removed best-effort
    /// and reads as absent.
    async fn decode<T: DeserializeOwned>(
        &self,
        row: EntryRow,
    ) -> CacheResult<Option<CacheItem<T>>> {
        match self.decode_value(&row) {
            Ok(value) => Ok(Some(CacheItem {
                partition: row.partition,
                key: row.key,
                value,
                utc_creation: row.utc_creation,
                utc_expiry: row.utc_expiry,
                interval: row.interval,
                parent_keys: row.parent_keys,
            })),
            Err(error) => {
                warn!(
                    partition = %row.partition,
                    key = %row.key,
                    %error,
                    "discarding undecodable cache entry"
                );
                if let Err(error) = self.store.delete_entry(&row.partition, &row.key).await {
                    warn!(
                        partition = %row.partition,
                        key = %row.key,
                        %error,
                        "failed to drop undecodable entry"
                    );
                }
                Ok(None)
            }
        }
    }

    fn decode_value<T: DeserializeOwned>(&self, row: &EntryRow) -> CacheResult<T> {
        let metadata = row.metadata();
        let source: Box<dyn Read + Send + '_> = Box::new(row.payload.as_slice());
        let mut reader = if row.compressed {
            self.compressor.decompress_stream(source)
        } else {
            source
        };
        envelope::read_and_verify(&mut reader, &metadata)?;
        self.serializer.read(&mut reader)
    }
}
