//! Opportunistic cleanup triggering.

use std::sync::atomic::{AtomicU64, Ordering};

use larder_core::{CacheConfig, RandomSource};

/// Decides when a successful insert is followed by a soft sweep of expired
/// rows.
///
/// Two policies exist and never interleave: when
/// `insertion_count_before_auto_clean` is configured, every n-th insert
/// sweeps; otherwise a Bernoulli trial with `chances_of_auto_cleanup` runs
/// per insert.
#[derive(Debug)]
pub struct CleanupPolicy {
    chance: f64,
    every: Option<u64>,
    insertions: AtomicU64,
}

impl CleanupPolicy {
    /// Derives the policy from a validated configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            chance: config.chances_of_auto_cleanup,
            every: config.insertion_count_before_auto_clean,
            insertions: AtomicU64::new(0),
        }
    }

    /// Whether the insert that just completed should trigger a sweep.
    pub fn should_sweep<R: RandomSource>(&self, random: &R) -> bool {
        match self.every {
            Some(every) => {
                let count = self.insertions.fetch_add(1, Ordering::Relaxed) + 1;
                count % every == 0
            }
            None => random.next_unit() < self.chance,
        }
    }
}
