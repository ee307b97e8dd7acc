//! Error type shared by both cache cores.
//!
//! Invalid-argument and invalid-state conditions are reported through
//! [`CacheError`]; I/O failures raised by a [`CacheWriter`](crate::CacheWriter)
//! are carried through unchanged so the engine's transaction layer can decide
//! recovery. Internal invariant violations (inserting the same position twice,
//! updating with a foreign record, a record still reachable after removal) are
//! programming errors and panic instead, gated behind the `check` feature.

extern crate alloc;

use alloc::string::String;
use thiserror::Error;

/// Errors reported by the page-cache family and the LIRS cache.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// A parameter was given a value outside its accepted range, for example
    /// an unknown cache-type selector or a segment count that is not a power
    /// of two.
    #[error("invalid value {value:?} for parameter {param}")]
    InvalidValue {
        /// Name of the offending parameter.
        param: &'static str,
        /// The rejected value, rendered for diagnostics.
        value: String,
    },

    /// The requested cache memory is too large for the bucket-count
    /// computation.
    #[error("a cache of {max_kb} kb is not supported")]
    UnsupportedCacheSize {
        /// The requested maximum memory in KiB.
        max_kb: u32,
    },

    /// The write-ahead log could not be committed before a write-back pass.
    #[error("log flush failed: {0}")]
    FlushLog(String),

    /// A dirty page could not be persisted.
    #[error("write-back of page {pos} failed: {reason}")]
    WriteBack {
        /// Position of the page that failed to persist.
        pos: u32,
        /// Description of the underlying failure.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn invalid_value(param: &'static str, value: impl Into<String>) -> Self {
        CacheError::InvalidValue {
            param,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::ToString;

    #[test]
    fn invalid_value_names_the_parameter() {
        let err = CacheError::invalid_value("CACHE_TYPE", "2Q");
        assert_eq!(
            format!("{err}"),
            "invalid value \"2Q\" for parameter CACHE_TYPE"
        );
    }

    #[test]
    fn unsupported_size_names_the_request() {
        let err = CacheError::UnsupportedCacheSize {
            max_kb: 600_000_000,
        };
        assert!(err.to_string().contains("600000000 kb"));
    }

    #[test]
    fn write_back_carries_the_position() {
        let err = CacheError::WriteBack {
            pos: 42,
            reason: "disk full".to_string(),
        };
        assert_eq!(format!("{err}"), "write-back of page 42 failed: disk full");
    }
}
