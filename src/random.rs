//! Random-replacement page cache.
//!
//! Eviction picks victims uniformly from the policy list instead of
//! maintaining an access order. Randomness makes the policy immune to
//! adversarial access patterns at the price of ignoring recency entirely;
//! it is mostly useful as a baseline when comparing the other policies.
//!
//! The victim picker walks the list from the sentinel, so a pick is O(n) in
//! the record count; eviction passes are rare enough that this has never
//! shown up in profiles. A candidate already buffered for write-back counts
//! against the traversal bound when skipped, which keeps a pass of
//! all-dirty records terminating.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::CacheError;
use crate::policy::PageCache;
use crate::record::{kb_to_words, CacheWriter, PageRecord, CACHE_MIN_RECORDS};
use crate::store::{write_back_dirty, RecordStore, SENTINEL};

/// Write-back page cache evicting uniformly random records.
pub struct RandomCache<R, W> {
    store: RecordStore<R>,
    writer: W,
    rng: SmallRng,
}

impl<R: PageRecord, W: CacheWriter<R>> RandomCache<R, W> {
    /// Creates a random-replacement cache with the given watermark in KiB.
    pub fn new(writer: W, max_kb: u32) -> Result<Self, CacheError> {
        Ok(RandomCache {
            store: RecordStore::new(max_kb)?,
            writer,
            rng: SmallRng::seed_from_u64(0x5DEE_CE66),
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
            let pick = self.rng.gen_range(0..rc as u32);
            let idx = self.store.nth_from_oldest(pick);
            if idx == SENTINEL {
                // empty list; nothing left to pick
                break;
            }
            let rec = Arc::clone(self.store.record(idx));
            if dirty.iter().any(|r| r.pos() == rec.pos()) {
                continue;
            }
            if !rec.can_remove() {
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

impl<R: PageRecord, W: CacheWriter<R>> PageCache<R> for RandomCache<R, W> {
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError> {
        Ok(self.store.find(pos))
    }

    fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.store.find(pos)
    }

    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError> {
        // charge the record before the pass so enough room is made, but
        // leave it unlinked so it cannot be its own victim
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

impl<R: PageRecord, W> core::fmt::Debug for RandomCache<R, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RandomCache")
            .field("records", &self.store.record_count())
            .field("memory_kb", &self.store.memory_kb())
            .field("max_memory_kb", &self.store.max_memory_kb())
            .finish()
    }
}
