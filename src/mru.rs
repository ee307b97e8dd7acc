//! Most Recently Used (MRU) page cache.
//!
//! The inverse of LRU: eviction walks from the most-recently-used end of the
//! list, which suits cyclic access patterns larger than the cache where the
//! least recently used page is exactly the one needed next. Accesses still
//! move a record to the most-recently-used end — that is what makes it the
//! next victim.
//!
//! A `put` runs its eviction pass *before* the new record joins the policy
//! list, so the victim is the previously most-recent record rather than the
//! page being inserted. Records that cannot be removed are pushed to the
//! least-recently-used end to keep the walk moving.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::CacheError;
use crate::policy::PageCache;
use crate::record::{kb_to_words, CacheWriter, PageRecord, CACHE_MIN_RECORDS};
use crate::store::{write_back_dirty, RecordStore, SENTINEL};

/// Write-back page cache evicting the most recently used record first.
pub struct MruCache<R, W> {
    store: RecordStore<R>,
    writer: W,
}

impl<R: PageRecord, W: CacheWriter<R>> MruCache<R, W> {
    /// Creates an MRU cache with the given watermark in KiB.
    pub fn new(writer: W, max_kb: u32) -> Result<Self, CacheError> {
        Ok(MruCache {
            store: RecordStore::new(max_kb)?,
            writer,
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
        let mut prev = self.store.prev(SENTINEL);
        loop {
            if rc <= CACHE_MIN_RECORDS {
                break;
            }
            if dirty.is_empty() {
                if mem <= self.store.max_memory_words() {
                    break;
                }
            } else if mem * 4 <= self.store.max_memory_words() * 3 {
                break;
            }
            let check = prev;
            prev = self.store.prev(check);
            examined += 1;
            if examined >= self.store.record_count() {
                if !flushed {
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
                // push out of the way, towards the least-recently-used end
                self.store.unlink(check);
                self.store.link_back(check);
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

impl<R: PageRecord, W: CacheWriter<R>> PageCache<R> for MruCache<R, W> {
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError> {
        match self.store.find_idx(pos) {
            Some(idx) => {
                self.store.unlink(idx);
                self.store.link_front(idx);
                Ok(Some(Arc::clone(self.store.record(idx))))
            }
            None => Ok(None),
        }
    }

    fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.store.find(pos)
    }

    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError> {
        // evict before linking: the incoming record must not be its own
        // pass's victim
        let idx = self.store.insert(record);
        self.evict_if_required()?;
        self.store.link_front(idx);
        Ok(())
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
                self.store.unlink(idx);
                self.store.link_front(idx);
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

impl<R: PageRecord, W> core::fmt::Debug for MruCache<R, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MruCache")
            .field("records", &self.store.record_count())
            .field("memory_kb", &self.store.memory_kb())
            .field("max_memory_kb", &self.store.max_memory_kb())
            .finish()
    }
}
