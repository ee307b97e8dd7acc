//! Record and writer contracts for the page-cache family.
//!
//! The storage engine owns the pages; the cache only sees them through the
//! [`PageRecord`] capability set and hands dirty ones back through the
//! [`CacheWriter`] contract. All list and bucket links belong to the cache
//! (they live in an internal arena, never in the record), so a record type
//! needs nothing beyond these read-only probes.

use crate::error::CacheError;

/// Memory charged per bucket-array slot, in 4-byte words. An empty cache
/// still accounts for its bucket array.
pub(crate) const BUCKET_SLOT_WORDS: u64 = 8;

/// Eviction never shrinks a cache below this many records.
pub const CACHE_MIN_RECORDS: usize = 16;

#[inline]
pub(crate) fn kb_to_words(kb: u32) -> u64 {
    u64::from(kb) * 1024 / 4
}

#[inline]
pub(crate) fn words_to_kb(words: u64) -> u32 {
    (words * 4 / 1024) as u32
}

/// A cached page, identified by its position in the database file.
///
/// Records are created by the owning storage engine and shared with the cache
/// as `Arc<R>`. The cache treats every capability as externally managed: it
/// observes `is_changed`/`can_remove`/`been_read` during eviction but never
/// mutates them.
pub trait PageRecord {
    /// The page position. Unique within a cache; used as the record identity.
    fn pos(&self) -> u32;

    /// Estimated size of the record, in 4-byte words.
    fn memory(&self) -> u32;

    /// Whether the record is dirty and must be written back before eviction.
    fn is_changed(&self) -> bool;

    /// Whether the record may be evicted right now (false while pinned, or
    /// while the log entry covering it has not been written).
    fn can_remove(&self) -> bool;

    /// Second-chance bit consulted only by the Clock policy. The engine sets
    /// it on a successful read; the cache observes it without clearing.
    fn been_read(&self) -> bool {
        true
    }
}

/// Write-back sink injected into every page cache.
///
/// The cache guarantees `flush_log` has been called at least once in an
/// eviction pass before the first `write_back` of that pass. Errors are
/// propagated unchanged; the cache restores its memory watermark and leaves
/// the record set coherent (written records removed, unwritten records still
/// cached).
pub trait CacheWriter<R: PageRecord> {
    /// Commit the write-ahead log up to the point required before any dirty
    /// page may be written back.
    fn flush_log(&mut self) -> Result<(), CacheError>;

    /// Synchronously persist one dirty record. The cache does not retain the
    /// record once this returns.
    fn write_back(&mut self, record: &R) -> Result<(), CacheError>;
}
