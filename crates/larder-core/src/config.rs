//! Cache configuration.

use crate::error::{CacheError, CacheResult};

/// Tunable knobs of a cache instance.
///
/// Connection strings and dialect selection are driver constructor
/// arguments, not part of this struct.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Partition used by the partition-less convenience surface.
    pub default_partition: String,
    /// Sliding interval, in days, applied by the static add operations.
    pub static_interval_days: u32,
    /// Probability in `[0, 1]` that a successful insert triggers a soft
    /// cleanup. Ignored when `insertion_count_before_auto_clean` is set.
    pub chances_of_auto_cleanup: f64,
    /// Payload size in bytes above which the envelope is compressed.
    pub min_value_length_for_compression: usize,
    /// When set to `n`, every n-th insert triggers a soft cleanup instead
    /// of the probabilistic policy.
    pub insertion_count_before_auto_clean: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_partition: "default".to_string(),
            static_interval_days: 30,
            chances_of_auto_cleanup: 0.01,
            min_value_length_for_compression: 4096,
            insertion_count_before_auto_clean: None,
        }
    }
}

impl CacheConfig {
    /// Validates the configuration, rejecting out-of-range values.
    pub fn validate(&self) -> CacheResult<()> {
        if self.default_partition.is_empty() {
            return Err(CacheError::InvalidArgument(
                "default_partition must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.chances_of_auto_cleanup) {
            return Err(CacheError::InvalidArgument(format!(
                "chances_of_auto_cleanup must be within [0, 1], got {}",
                self.chances_of_auto_cleanup
            )));
        }
        if self.static_interval_days == 0 {
            return Err(CacheError::InvalidArgument(
                "static_interval_days must be at least 1".to_string(),
            ));
        }
        if self.insertion_count_before_auto_clean == Some(0) {
            return Err(CacheError::InvalidArgument(
                "insertion_count_before_auto_clean must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The static sliding interval in seconds.
    pub fn static_interval_secs(&self) -> i64 {
        i64::from(self.static_interval_days) * 86_400
    }
}
