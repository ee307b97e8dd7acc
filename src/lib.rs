#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Crate layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`policy`] | the [`PageCache`] contract and the [`open_cache`] factory |
//! | [`record`] | the [`PageRecord`] and [`CacheWriter`] contracts |
//! | [`lru`], [`mru`], [`clock`], [`random`] | the replacement policies |
//! | [`second_level`] | the `SOFT_` second-chance wrapper |
//! | [`lirs`] | the concurrent scan-resistant cache |
//! | [`config`] | [`LirsConfig`](config::LirsConfig) |
//! | [`error`] | [`CacheError`] |
//!
//! # Memory accounting
//!
//! The page caches account in 4-byte words and take their watermark in KiB,
//! matching how the owning engine sizes its buffers; an empty cache already
//! charges its bucket array. The LIRS cache accounts in whatever unit the
//! caller passes as each entry's cost (bytes suggested) and splits its
//! budget evenly across segments.
//!
//! # Error handling
//!
//! Writer failures propagate as [`CacheError`] and never leave a cache
//! incoherent: an interrupted write-back pass keeps every unwritten record
//! cached and restores the watermark. Invariant violations are programming
//! errors and panic when the `check` feature (default) is enabled.

#![no_std]

/// Error type shared by both cache cores.
pub mod error;

/// Record and writer contracts for the page-cache family.
pub mod record;

/// Shared bucket-array and policy-list skeleton of the page caches.
///
/// Internal infrastructure; the policy modules drive it.
pub(crate) mod store;

/// The page-cache contract and the string-selector factory.
pub mod policy;

/// Least Recently Used page cache, with the FIFO variant.
pub mod lru;

/// Most Recently Used page cache.
pub mod mru;

/// Clock (second-chance) page cache.
pub mod clock;

/// Random-replacement page cache.
pub mod random;

/// Second-level cache giving evicted records a second chance.
pub mod second_level;

/// Configuration of the concurrent LIRS cache.
#[cfg(feature = "concurrent")]
pub mod config;

/// Concurrent scan-resistant cache over 64-bit keys.
///
/// Available when the `concurrent` feature (default) is enabled.
#[cfg(feature = "concurrent")]
pub mod lirs;

pub use error::CacheError;
pub use policy::{open_cache, PageCache};
pub use record::{CacheWriter, PageRecord, CACHE_MIN_RECORDS};

pub use clock::ClockCache;
pub use lru::LruCache;
pub use mru::MruCache;
pub use random::RandomCache;
pub use second_level::SecondLevelCache;

#[cfg(feature = "concurrent")]
pub use lirs::LirsCache;
