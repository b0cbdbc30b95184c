//! The public, partition-scoped cache surface.
//!
//! [`PersistentCache`] validates arguments, traps internal failures per the
//! propagation policy (writes fail loudly, reads degrade to absent), records
//! the last failure, and refuses operations after [`PersistentCache::dispose`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use larder_core::{
    CacheConfig, CacheError, CacheItem, CacheResult, CacheStore, Clock, Compressor,
    DeflateCompressor, ExpiryFilter, MessagePackSerializer, RandomSource, Serializer, SystemClock,
    ThreadRandom, MAX_PARENT_KEYS,
};

use crate::engine::{Expiration, StorageEngine};

/// A durable, partitioned key-value cache over a storage driver.
///
/// Construct with [`PersistentCache::new`] for the default collaborators or
/// [`PersistentCache::builder`] to override any of them. All operations are
/// safe to call from concurrent tasks through a shared reference.
pub struct PersistentCache<
    S,
    Ser = MessagePackSerializer,
    Comp = DeflateCompressor,
    Clk = SystemClock,
    Rng = ThreadRandom,
> {
    engine: StorageEngine<S, Ser, Comp, Clk, Rng>,
    disposed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Builder assembling a [`PersistentCache`] from its collaborators.
pub struct PersistentCacheBuilder<S, Ser, Comp, Clk, Rng> {
    store: S,
    serializer: Ser,
    compressor: Comp,
    clock: Clk,
    random: Rng,
    config: CacheConfig,
}

impl<S: CacheStore> PersistentCache<S> {
    /// A cache over `store` with default collaborators and configuration.
    pub fn new(store: S) -> CacheResult<Self> {
        Self::builder(store).build()
    }

    /// Starts a builder over `store`.
    pub fn builder(
        store: S,
    ) -> PersistentCacheBuilder<S, MessagePackSerializer, DeflateCompressor, SystemClock, ThreadRandom>
    {
        PersistentCacheBuilder {
            store,
            serializer: MessagePackSerializer,
            compressor: DeflateCompressor::default(),
            clock: SystemClock,
            random: ThreadRandom,
            config: CacheConfig::default(),
        }
    }
}

impl<S, Ser, Comp, Clk, Rng> PersistentCacheBuilder<S, Ser, Comp, Clk, Rng> {
    /// Replaces the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the serializer.
    pub fn serializer<Ser2>(self, serializer: Ser2) -> PersistentCacheBuilder<S, Ser2, Comp, Clk, Rng> {
        PersistentCacheBuilder {
            store: self.store,
            serializer,
            compressor: self.compressor,
            clock: self.clock,
            random: self.random,
            config: self.config,
        }
    }

    /// Replaces the compressor.
    pub fn compressor<Comp2>(self, compressor: Comp2) -> PersistentCacheBuilder<S, Ser, Comp2, Clk, Rng> {
        PersistentCacheBuilder {
            store: self.store,
            serializer: self.serializer,
            compressor,
            clock: self.clock,
            random: self.random,
            config: self.config,
        }
    }

    /// Replaces the clock; share an `Arc<VirtualClock>` here in tests.
    pub fn clock<Clk2>(self, clock: Clk2) -> PersistentCacheBuilder<S, Ser, Comp, Clk2, Rng> {
        PersistentCacheBuilder {
            store: self.store,
            serializer: self.serializer,
            compressor: self.compressor,
            clock,
            random: self.random,
            config: self.config,
        }
    }

    /// Replaces the random source.
    pub fn random<Rng2>(self, random: Rng2) -> PersistentCacheBuilder<S, Ser, Comp, Clk, Rng2> {
        PersistentCacheBuilder {
            store: self.store,
            serializer: self.serializer,
            compressor: self.compressor,
            clock: self.clock,
            random,
            config: self.config,
        }
    }

    /// Validates the configuration and assembles the cache.
    pub fn build(self) -> CacheResult<PersistentCache<S, Ser, Comp, Clk, Rng>>
    where
        S: CacheStore,
        Ser: Serializer,
        Comp: Compressor,
        Clk: Clock,
        Rng: RandomSource,
    {
        self.config.validate()?;
        Ok(PersistentCache {
            engine: StorageEngine::new(
                self.store,
                self.serializer,
                self.compressor,
                self.clock,
                self.random,
                self.config,
            ),
            disposed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }
}

fn validate_partition(partition: &str) -> CacheResult<()> {
    if partition.is_empty() {
        return Err(CacheError::InvalidArgument(
            "partition must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_identity(partition: &str, key: &str) -> CacheResult<()> {
    validate_partition(partition)?;
    if key.is_empty() {
        return Err(CacheError::InvalidArgument(
            "key must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_parents(parents: &[&str]) -> CacheResult<()> {
    if parents.len() > MAX_PARENT_KEYS {
        return Err(CacheError::InvalidArgument(format!(
            "at most {MAX_PARENT_KEYS} parent keys are allowed, got {}",
            parents.len()
        )));
    }
    if parents.iter().any(|p| p.is_empty()) {
        return Err(CacheError::InvalidArgument(
            "parent keys must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_interval(interval: i64) -> CacheResult<()> {
    if interval <= 0 {
        return Err(CacheError::InvalidArgument(format!(
            "sliding interval must be positive, got {interval}"
        )));
    }
    Ok(())
}

impl<S, Ser, Comp, Clk, Rng> PersistentCache<S, Ser, Comp, Clk, Rng>
where
    S: CacheStore,
    Ser: Serializer,
    Comp: Compressor,
    Clk: Clock,
    Rng: RandomSource,
{
    /// The active configuration.
    pub fn config(&self) -> &CacheConfig {
        self.engine.config()
    }

    /// Whether the driver supports the peek family.
    pub fn can_peek(&self) -> bool {
        self.engine.can_peek()
    }

    /// Message of the most recent trapped or propagated failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tears the cache down; every subsequent operation fails with
    /// [`CacheError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Whether [`PersistentCache::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.is_disposed() {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    fn note_failure(&self, error: &CacheError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    /// Write-path policy: failures propagate after being recorded.
    fn propagate<T>(&self, op: &'static str, result: CacheResult<T>) -> CacheResult<T> {
        if let Err(err) = &result {
            self.note_failure(err);
            error!(op, error = %err, "cache operation failed");
        }
        result
    }

    /// Read-path policy: storage failures degrade to `fallback`; everything
    /// else (including `NotSupported`) propagates.
    fn degrade<T>(&self, op: &'static str, result: CacheResult<T>, fallback: T) -> CacheResult<T> {
        match result {
            Err(CacheError::StorageFailure(source)) => {
                let err = CacheError::StorageFailure(source);
                self.note_failure(&err);
                warn!(op, error = %err, "cache read degraded");
                Ok(fallback)
            }
            other => other,
        }
    }

    /// Stores `value` under `(partition, key)` with a fixed expiry instant.
    pub async fn add_timed<T>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parents: &[&str],
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        validate_parents(parents)?;
        let result = self
            .engine
            .upsert(partition, key, value, Expiration::Timed { utc_expiry }, parents)
            .await;
        self.propagate("add_timed", result)
    }

    /// Stores `value` with a sliding expiry of `interval` seconds.
    pub async fn add_sliding<T>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        interval: i64,
        parents: &[&str],
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        validate_parents(parents)?;
        validate_interval(interval)?;
        let result = self
            .engine
            .upsert(partition, key, value, Expiration::Sliding { interval }, parents)
            .await;
        self.propagate("add_sliding", result)
    }

    /// Stores `value` with the long, refresh-on-access static interval.
    pub async fn add_static<T>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        parents: &[&str],
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        validate_parents(parents)?;
        let interval = self.engine.config().static_interval_secs();
        let result = self
            .engine
            .upsert(partition, key, value, Expiration::Sliding { interval }, parents)
            .await;
        self.propagate("add_static", result)
    }

    /// The value under `(partition, key)`, extending a sliding expiry.
    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<T>> {
        Ok(self
            .get_item(partition, key)
            .await?
            .map(|item| item.value))
    }

    /// Like [`PersistentCache::get`], returning the row metadata too.
    pub async fn get_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        let result = self.engine.get(partition, key).await;
        self.degrade("get_item", result, None)
    }

    /// Every live item of `partition` (or the whole store), read-extended.
    pub async fn get_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            validate_partition(partition)?;
        }
        let result = self.engine.get_many(partition).await;
        self.degrade("get_items", result, Vec::new())
    }

    /// The value under `(partition, key)` without extending its expiry.
    pub async fn peek<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<T>> {
        Ok(self
            .peek_item(partition, key)
            .await?
            .map(|item| item.value))
    }

    /// Like [`PersistentCache::peek`], returning the row metadata too.
    pub async fn peek_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        let result = self.engine.peek(partition, key).await;
        self.degrade("peek_item", result, None)
    }

    /// Every live item in scope, expiry untouched.
    pub async fn peek_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            validate_partition(partition)?;
        }
        let result = self.engine.peek_many(partition).await;
        self.degrade("peek_items", result, Vec::new())
    }

    /// Whether a live entry exists under `(partition, key)`.
    pub async fn contains(&self, partition: &str, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        let result = self.engine.contains(partition, key).await;
        self.degrade("contains", result, false)
    }

    /// Removes `(partition, key)` and, transitively, every entry that
    /// declared it as a parent. No-op when absent.
    pub async fn remove(&self, partition: &str, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        validate_identity(partition, key)?;
        let result = self.engine.remove(partition, key).await.map(|_| ());
        self.propagate("remove", result)
    }

    /// Hard cleanup of the whole store; returns rows removed.
    pub async fn clear(&self) -> CacheResult<u64> {
        self.ensure_open()?;
        let result = self.engine.clear(None, ExpiryFilter::All).await;
        self.propagate("clear", result)
    }

    /// Hard cleanup of one partition; returns rows removed.
    pub async fn clear_partition(&self, partition: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        validate_partition(partition)?;
        let result = self.engine.clear(Some(partition), ExpiryFilter::All).await;
        self.propagate("clear_partition", result)
    }

    /// Soft cleanup: removes expired rows (and their dependents) in
    /// `partition` or the whole store; returns rows removed.
    pub async fn clear_expired(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            validate_partition(partition)?;
        }
        let result = self.engine.sweep_expired(partition).await;
        self.propagate("clear_expired", result)
    }

    /// Number of live entries in scope, saturating at `u32::MAX`.
    pub async fn count(&self, partition: Option<&str>) -> CacheResult<u32> {
        Ok(self
            .long_count(partition)
            .await?
            .try_into()
            .unwrap_or(u32::MAX))
    }

    /// Number of live entries in scope.
    pub async fn long_count(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            validate_partition(partition)?;
        }
        let result = self.engine.count(partition, ExpiryFilter::Live).await;
        self.degrade("long_count", result, 0)
    }

    /// Sum of stored payload lengths in scope, in bytes.
    pub async fn cache_size_bytes(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            validate_partition(partition)?;
        }
        let result = self.engine.size_bytes(partition).await;
        self.degrade("cache_size_bytes", result, 0)
    }

    /// Gets `(partition, key)` or stores the factory's value with a fixed
    /// expiry. The factory runs at most once, and only on a miss.
    pub async fn get_or_add_timed<T, F>(
        &self,
        partition: &str,
        key: &str,
        factory: F,
        utc_expiry: i64,
        parents: &[&str],
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(partition, key).await? {
            return Ok(value);
        }
        let value = factory();
        self.add_timed(partition, key, &value, utc_expiry, parents)
            .await?;
        Ok(value)
    }

    /// Gets `(partition, key)` or stores the factory's value with a sliding
    /// expiry of `interval` seconds.
    pub async fn get_or_add_sliding<T, F>(
        &self,
        partition: &str,
        key: &str,
        factory: F,
        interval: i64,
        parents: &[&str],
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        validate_interval(interval)?;
        if let Some(value) = self.get(partition, key).await? {
            return Ok(value);
        }
        let value = factory();
        self.add_sliding(partition, key, &value, interval, parents)
            .await?;
        Ok(value)
    }

    /// Gets `(partition, key)` or stores the factory's value with the
    /// static interval.
    pub async fn get_or_add_static<T, F>(
        &self,
        partition: &str,
        key: &str,
        factory: F,
        parents: &[&str],
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(partition, key).await? {
            return Ok(value);
        }
        let value = factory();
        self.add_static(partition, key, &value, parents).await?;
        Ok(value)
    }

    /// A handle binding `name` as the partition of every operation.
    pub fn partition(&self, name: impl Into<String>) -> PartitionHandle<'_, S, Ser, Comp, Clk, Rng> {
        PartitionHandle {
            cache: self,
            partition: name.into(),
        }
    }

    /// A handle over the configured default partition.
    pub fn default_partition(&self) -> PartitionHandle<'_, S, Ser, Comp, Clk, Rng> {
        self.partition(self.engine.config().default_partition.clone())
    }
}

/// A cache view with the partition bound once.
///
/// The partition-less convenience surface: obtain one via
/// [`PersistentCache::default_partition`] or [`PersistentCache::partition`].
pub struct PartitionHandle<'a, S, Ser, Comp, Clk, Rng> {
    cache: &'a PersistentCache<S, Ser, Comp, Clk, Rng>,
    partition: String,
}

impl<S, Ser, Comp, Clk, Rng> PartitionHandle<'_, S, Ser, Comp, Clk, Rng>
where
    S: CacheStore,
    Ser: Serializer,
    Comp: Compressor,
    Clk: Clock,
    Rng: RandomSource,
{
    /// The bound partition.
    pub fn name(&self) -> &str {
        &self.partition
    }

    /// See [`PersistentCache::add_timed`].
    pub async fn add_timed<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parents: &[&str],
    ) -> CacheResult<()> {
        self.cache
            .add_timed(&self.partition, key, value, utc_expiry, parents)
            .await
    }

    /// See [`PersistentCache::add_sliding`].
    pub async fn add_sliding<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        interval: i64,
        parents: &[&str],
    ) -> CacheResult<()> {
        self.cache
            .add_sliding(&self.partition, key, value, interval, parents)
            .await
    }

    /// See [`PersistentCache::add_static`].
    pub async fn add_static<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        parents: &[&str],
    ) -> CacheResult<()> {
        self.cache
            .add_static(&self.partition, key, value, parents)
            .await
    }

    /// See [`PersistentCache::get`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.cache.get(&self.partition, key).await
    }

    /// See [`PersistentCache::get_item`].
    pub async fn get_item<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.cache.get_item(&self.partition, key).await
    }

    /// See [`PersistentCache::peek`].
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.cache.peek(&self.partition, key).await
    }

    /// See [`PersistentCache::peek_item`].
    pub async fn peek_item<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.cache.peek_item(&self.partition, key).await
    }

    /// See [`PersistentCache::contains`].
    pub async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.cache.contains(&self.partition, key).await
    }

    /// See [`PersistentCache::remove`].
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        self.cache.remove(&self.partition, key).await
    }

    /// Live entries in this partition.
    pub async fn count(&self) -> CacheResult<u32> {
        self.cache.count(Some(&self.partition)).await
    }
}
