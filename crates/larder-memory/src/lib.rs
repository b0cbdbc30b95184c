#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **larder-memory** – In-memory storage driver for Larder.
//!
//! A fast, non-persistent backend suitable for testing, development, and
//! scenarios where durability is not required. All entries live in process
//! memory and are lost on termination.
//!
//! The driver reports `can_peek = false`, mirroring the ephemeral backend of
//! the original system: the facade refuses the peek family against it.
//! Cascades run the iterative fixed-point algorithm with a visited set, so
//! parent-key cycles terminate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use larder_core::{CacheStore, EntryRow, ExpiryFilter};

const MAX_PARTITION_LEN: usize = 255;
const MAX_KEY_LEN: usize = 255;

type Entries = HashMap<(String, String), EntryRow>;

/// An in-memory, non-persistent cache store.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held, regardless of expiry.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Removes `seeds` and every transitive dependent within `partition`.
///
/// The doomed set doubles as the visited set, so cycles terminate.
fn cascade_remove(entries: &mut Entries, partition: &str, seeds: Vec<String>) -> u64 {
    let mut doomed: HashSet<String> = seeds.iter().cloned().collect();
    let mut frontier = seeds;
    while let Some(parent) = frontier.pop() {
        let dependents: Vec<String> = entries
            .iter()
            .filter(|((p, k), row)| {
                p == partition
                    && !doomed.contains(k.as_str())
                    && row.parent_keys.iter().any(|pk| *pk == parent)
            })
            .map(|((_, k), _)| k.clone())
            .collect();
        for child in dependents {
            doomed.insert(child.clone());
            frontier.push(child);
        }
    }
    let mut removed = 0;
    for key in doomed {
        if entries.remove(&(partition.to_string(), key)).is_some() {
            removed += 1;
        }
    }
    removed
}

/// Partitions in scope for a group operation.
fn partitions_in_scope(entries: &Entries, partition: Option<&str>) -> Vec<String> {
    match partition {
        Some(p) => vec![p.to_string()],
        None => {
            let unique: HashSet<&str> = entries.keys().map(|(p, _)| p.as_str()).collect();
            unique.into_iter().map(str::to_string).collect()
        }
    }
}

fn in_scope(partition: Option<&str>, candidate: &str) -> bool {
    partition.map_or(true, |p| p == candidate)
}

fn sort_rows(rows: &mut [EntryRow]) {
    rows.sort_by(|a, b| (&a.partition, &a.key).cmp(&(&b.partition, &b.key)));
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn max_partition_len(&self) -> usize {
        MAX_PARTITION_LEN
    }

    fn max_key_len(&self) -> usize {
        MAX_KEY_LEN
    }

    fn can_peek(&self) -> bool {
        false
    }

    async fn upsert_entry(&self, row: &EntryRow) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((row.partition.clone(), row.key.clone()), row.clone());
        Ok(())
    }

    async fn peek_entry(
        &self,
        partition: &str,
        key: &str,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<Option<EntryRow>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(partition.to_string(), key.to_string()))
            .filter(|row| filter.admits(row.utc_expiry, now))
            .cloned())
    }

    async fn peek_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<Vec<EntryRow>> {
        let entries = self.entries.read().await;
        let mut rows: Vec<EntryRow> = entries
            .values()
            .filter(|row| in_scope(partition, &row.partition))
            .filter(|row| filter.admits(row.utc_expiry, now))
            .cloned()
            .collect();
        sort_rows(&mut rows);
        Ok(rows)
    }

    async fn touch_entries(&self, partition: Option<&str>, now: i64) -> Result<Vec<EntryRow>> {
        let mut entries = self.entries.write().await;

        // Expired rows cascade out first; a doomed parent may take live
        // dependents with it, so survivors are collected afterwards.
        for scope in partitions_in_scope(&entries, partition) {
            let expired: Vec<String> = entries
                .iter()
                .filter(|((p, _), row)| *p == scope && row.utc_expiry < now)
                .map(|((_, k), _)| k.clone())
                .collect();
            if !expired.is_empty() {
                cascade_remove(&mut entries, &scope, expired);
            }
        }

        let mut rows = Vec::new();
        for row in entries.values_mut() {
            if in_scope(partition, &row.partition) {
                if row.interval > 0 {
                    row.utc_expiry = row.utc_expiry.max(now + row.interval);
                }
                rows.push(row.clone());
            }
        }
        sort_rows(&mut rows);
        Ok(rows)
    }

    async fn contains_entry(&self, partition: &str, key: &str, now: i64) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(partition.to_string(), key.to_string()))
            .is_some_and(|row| row.utc_expiry >= now))
    }

    async fn count_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|row| in_scope(partition, &row.partition))
            .filter(|row| filter.admits(row.utc_expiry, now))
            .count() as u64)
    }

    async fn delete_entry(&self, partition: &str, key: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        Ok(cascade_remove(&mut entries, partition, vec![key.to_string()]))
    }

    async fn delete_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for scope in partitions_in_scope(&entries, partition) {
            let seeds: Vec<String> = entries
                .iter()
                .filter(|((p, _), row)| *p == scope && filter.admits(row.utc_expiry, now))
                .map(|((_, k), _)| k.clone())
                .collect();
            if !seeds.is_empty() {
                removed += cascade_remove(&mut entries, &scope, seeds);
            }
        }
        Ok(removed)
    }

    async fn update_entry_expiry(
        &self,
        partition: &str,
        key: &str,
        utc_expiry: i64,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(row) = entries.get_mut(&(partition.to_string(), key.to_string())) {
            row.utc_expiry = row.utc_expiry.max(utc_expiry);
        }
        Ok(())
    }

    async fn cache_size_bytes(&self, partition: Option<&str>) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|row| in_scope(partition, &row.partition))
            .map(|row| row.payload.len() as u64)
            .sum())
    }
}
