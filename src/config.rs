//! Configuration for the segmented LIRS cache.
//!
//! Plain struct with public fields: create it with the defaults and override
//! what you need.
//!
//! # Examples
//!
//! ```
//! use pagecache_rs::config::LirsConfig;
//!
//! let config = LirsConfig {
//!     max_memory: 64 * 1024 * 1024,
//!     ..LirsConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

extern crate alloc;

use alloc::string::ToString;

use crate::error::CacheError;

/// Configuration of a [`LirsCache`](crate::LirsCache).
#[derive(Clone, Copy, Debug)]
pub struct LirsConfig {
    /// The maximum memory to use, in caller-chosen units (1 or larger;
    /// bytes are suggested).
    pub max_memory: u64,

    /// The number of cache segments. Must be a power of two.
    pub segment_count: u32,

    /// How many other entries must move to the top of the stack before an
    /// accessed hot entry is moved again. Batches stack writes on the
    /// hottest entries.
    pub stack_move_distance: u32,

    /// Low watermark for the non-resident queue length, as a factor of the
    /// resident entry count.
    pub non_resident_queue_size: u32,

    /// High watermark for the non-resident queue length, as a factor of the
    /// resident entry count. Between the two watermarks, entries whose weak
    /// reference is still alive are kept for a second chance.
    pub non_resident_queue_size_high: u32,
}

impl Default for LirsConfig {
    fn default() -> Self {
        LirsConfig {
            max_memory: 1,
            segment_count: 16,
            stack_move_distance: 32,
            non_resident_queue_size: 3,
            non_resident_queue_size_high: 12,
        }
    }
}

impl LirsConfig {
    /// Checks the parameter ranges.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_memory == 0 {
            return Err(CacheError::invalid_value(
                "MAX_MEMORY",
                self.max_memory.to_string(),
            ));
        }
        if !self.segment_count.is_power_of_two() {
            return Err(CacheError::invalid_value(
                "SEGMENT_COUNT",
                self.segment_count.to_string(),
            ));
        }
        Ok(())
    }
}
