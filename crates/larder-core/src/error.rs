//! Error taxonomy shared across the cache.

use thiserror::Error;

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can surface from cache operations.
///
/// Writes, deletes and clears fail loudly; reads degrade to an absent result
/// at the facade while the failure is logged and recorded. Only
/// [`CacheError::NotSupported`], [`CacheError::Disposed`] and
/// [`CacheError::InvalidArgument`] propagate from reads.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A caller-supplied argument or configuration value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The serializer rejected a value, or a stored payload failed to
    /// decode. Propagated from writes; on reads the offending row is
    /// removed and the result is absent.
    #[error("value serialization failed: {0}")]
    InvalidValue(String),

    /// The integrity stamp of a stored payload does not match the row
    /// metadata. Surfaced only as a warning plus row removal; the read
    /// reports absent.
    #[error("integrity stamp mismatch for '{partition}/{key}'")]
    TamperDetected {
        /// Partition of the offending row.
        partition: String,
        /// Key of the offending row.
        key: String,
    },

    /// A storage operation failed after exhausting retries.
    #[error("storage operation failed: {0}")]
    StorageFailure(#[from] anyhow::Error),

    /// The cache was torn down before the operation ran.
    #[error("cache has been disposed")]
    Disposed,

    /// The operation is not meaningful for this backend.
    #[error("operation not supported by this backend")]
    NotSupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failure_wraps_anyhow() {
        let error: CacheError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(error, CacheError::StorageFailure(_)));
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn tamper_message_names_the_row() {
        let error = CacheError::TamperDetected {
            partition: "users".to_string(),
            key: "42".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "integrity stamp mismatch for 'users/42'"
        );
    }
}
