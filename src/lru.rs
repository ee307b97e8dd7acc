//! Least Recently Used (LRU) page cache, with a FIFO variant.
//!
//! The default configuration moves a record to the most-recently-used end of
//! the policy list on every access, so eviction walks from the least-recently
//! used end. The FIFO variant keeps insertion order: accesses do not reorder
//! the list, and eviction expels the oldest insertion first.
//!
//! # Data Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         LruCache                               │
//! │                                                                │
//! │  buckets[pos & mask]           policy list (circular)          │
//! │  ┌───────────────┐       ┌──────────────────────────────┐      │
//! │  │ 0 ─▶ chain    │       │ sentinel ◀─▶ LRU ◀─▶ … ◀─▶ MRU│     │
//! │  │ 1 ─▶ chain    │       └──────────────────────────────┘      │
//! │  │ …             │       eviction walks LRU → MRU              │
//! │  └───────────────┘                                             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Eviction
//!
//! A pass runs whenever the memory counter reaches the watermark. Clean
//! removable records are expelled immediately; dirty ones are buffered and
//! written back as one position-sorted group after a single `flush_log`. The
//! pass stops once the cache is back under the watermark (a relaxed 3/4
//! watermark while dirty records are buffered, since their write-back will
//! reclaim the memory), or once only
//! [`CACHE_MIN_RECORDS`](crate::CACHE_MIN_RECORDS) records remain. Records
//! whose `can_remove` is false are bumped to the most-recently-used end and
//! the walk continues.
//!
//! # Approximations
//!
//! This is not a strict LRU: pinned records get a recency bump when skipped,
//! and a pass that cannot make progress flushes the log once, gives every
//! record a second look, and only then reports the cache as undersized.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::CacheError;
use crate::policy::PageCache;
use crate::record::{kb_to_words, CacheWriter, PageRecord, CACHE_MIN_RECORDS};
use crate::store::{write_back_dirty, RecordStore, SENTINEL};

/// Write-back page cache evicting the least recently used record first.
///
/// Construct the FIFO variant with [`LruCache::fifo`]; it shares the whole
/// skeleton and differs only in that accesses never reorder the list.
pub struct LruCache<R, W> {
    store: RecordStore<R>,
    writer: W,
    fifo: bool,
}

impl<R: PageRecord, W: CacheWriter<R>> LruCache<R, W> {
    /// Creates an LRU cache with the given watermark in KiB.
    pub fn new(writer: W, max_kb: u32) -> Result<Self, CacheError> {
        Self::with_order(writer, max_kb, false)
    }

    /// Creates the FIFO variant: insertion order only, no recency bumps on
    /// access.
    pub fn fifo(writer: W, max_kb: u32) -> Result<Self, CacheError> {
        Self::with_order(writer, max_kb, true)
    }

    fn with_order(writer: W, max_kb: u32, fifo: bool) -> Result<Self, CacheError> {
        Ok(LruCache {
            store: RecordStore::new(max_kb)?,
            writer,
            fifo,
        })
    }

    fn evict_if_required(&mut self) -> Result<(), CacheError> {
        if self.store.memory_words() >= self.store.max_memory_words() {
            self.evict()
        } else {
            Ok(())
        }
    }

    fn evict(&mut self) -> Result<(), CacheError> {
        let mut dirty: Vec<Arc<R>> = Vec::new();
        let mut examined = 0usize;
        let mut mem = self.store.memory_words();
        let mut rc = self.store.record_count();
        let mut flushed = false;
        let mut next = self.store.next(SENTINEL);
        loop {
            if rc <= CACHE_MIN_RECORDS {
                break;
            }
            if dirty.is_empty() {
                if mem <= self.store.max_memory_words() {
                    break;
                }
            } else if mem * 4 <= self.store.max_memory_words() * 3 {
                // the buffered write-back will reclaim the rest
                break;
            }
            let check = next;
            next = self.store.next(check);
            examined += 1;
            if examined >= self.store.record_count() {
                if !flushed {
                    // the unwritten log may be what pins the records; flush
                    // once and give every record a second look
                    self.writer.flush_log()?;
                    flushed = true;
                    examined = 0;
                } else {
                    log::info!(
                        "cannot evict enough records, cache size too small? records: {} memory: {}",
                        self.store.record_count(),
                        self.store.memory_words()
                    );
                    break;
                }
            }
            if check == SENTINEL {
                continue;
            }
            let rec = Arc::clone(self.store.record(check));
            if !rec.can_remove() {
                self.store.unlink(check);
                self.store.link_front(check);
                continue;
            }
            rc -= 1;
            mem -= u64::from(rec.memory());
            if rec.is_changed() {
                dirty.push(rec);
            } else {
                self.store.remove(rec.pos());
            }
        }
        if !dirty.is_empty() {
            if !flushed {
                self.writer.flush_log()?;
            }
            write_back_dirty(&mut self.store, &mut self.writer, dirty)?;
        }
        Ok(())
    }
}

impl<R: PageRecord, W: CacheWriter<R>> PageCache<R> for LruCache<R, W> {
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError> {
        match self.store.find_idx(pos) {
            Some(idx) => {
                if !self.fifo {
                    self.store.unlink(idx);
                    self.store.link_front(idx);
                }
                Ok(Some(Arc::clone(self.store.record(idx))))
            }
            None => Ok(None),
        }
    }

    fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.store.find(pos)
    }

    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError> {
        let idx = self.store.insert(record);
        self.store.link_front(idx);
        self.evict_if_required()
    }

    fn update(&mut self, pos: u32, record: Arc<R>) -> Result<Option<Arc<R>>, CacheError> {
        match self.store.find_idx(pos) {
            None => {
                self.put(record)?;
                Ok(None)
            }
            Some(idx) => {
                let existing = Arc::clone(self.store.record(idx));
                #[cfg(feature = "check")]
                assert!(
                    Arc::ptr_eq(&existing, &record),
                    "update with a foreign record at position {pos}"
                );
                let _ = record;
                if !self.fifo {
                    self.store.unlink(idx);
                    self.store.link_front(idx);
                }
                Ok(Some(existing))
            }
        }
    }

    fn remove(&mut self, pos: u32) -> bool {
        self.store.remove(pos)
    }

    fn clear(&mut self) {
        self.store.clear();
    }

    fn set_max_memory(&mut self, max_kb: u32) -> Result<(), CacheError> {
        self.store.set_max_memory_words(kb_to_words(max_kb));
        self.evict_if_required()
    }

    fn max_memory_kb(&self) -> u32 {
        self.store.max_memory_kb()
    }

    fn memory_kb(&self) -> u32 {
        self.store.memory_kb()
    }

    fn all_changed(&self) -> Vec<Arc<R>> {
        self.store.all_changed()
    }
}

impl<R: PageRecord, W> core::fmt::Debug for LruCache<R, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct(if self.fifo { "FifoCache" } else { "LruCache" })
            .field("records", &self.store.record_count())
            .field("memory_kb", &self.store.memory_kb())
            .field("max_memory_kb", &self.store.max_memory_kb())
            .finish()
    }
}
