//! Clock (second-chance) page cache.
//!
//! A clock hand sweeps the policy list in insertion order and persists across
//! eviction passes. A candidate under the hand is expelled only when it is
//! removable and its `been_read` bit is set; the bit is externally managed —
//! the engine sets it on a successful read and the sweep advances without
//! clearing it. Accesses through `get` never reorder the list; the hand
//! position is the only policy state.
//!
//! Unlike the recency policies, a `put` makes room *before* the new record
//! is charged, so a cache sitting exactly at its watermark frees a batch of
//! records up to the relaxed 3/4 watermark in one sweep. This is what gives
//! Clock its characteristically batched write-back.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::CacheError;
use crate::policy::PageCache;
use crate::record::{kb_to_words, CacheWriter, PageRecord, CACHE_MIN_RECORDS};
use crate::store::{RecordStore, SENTINEL};

/// Write-back page cache with second-chance (Clock) replacement.
pub struct ClockCache<R, W> {
    store: RecordStore<R>,
    writer: W,
    /// The clock hand, a slot handle. Points at the sentinel when parked.
    hand: u32,
}

impl<R: PageRecord, W: CacheWriter<R>> ClockCache<R, W> {
    /// Creates a Clock cache with the given watermark in KiB.
    pub fn new(writer: W, max_kb: u32) -> Result<Self, CacheError> {
        Ok(ClockCache {
            store: RecordStore::new(max_kb)?,
            writer,
            hand: SENTINEL,
        })
    }

    fn evict_if_required(&mut self) -> Result<(), CacheError> {
        if self.store.memory_words() >= self.store.max_memory_words() {
            self.evict()
        } else {
            Ok(())
        }
    }

    /// Removes a record, stepping the hand off it first.
    fn remove_record(&mut self, pos: u32) -> bool {
        if let Some(idx) = self.store.find_idx(pos) {
            if self.hand == idx {
                self.hand = self.store.next(idx);
            }
            self.store.remove(pos)
        } else {
            false
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
                // this pass triggers at the watermark and must make room
                // for the record about to be charged
                if mem < self.store.max_memory_words() {
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
            if self.hand == SENTINEL {
                self.hand = self.store.next(SENTINEL);
                continue;
            }
            let idx = self.hand;
            let rec = Arc::clone(self.store.record(idx));
            if !rec.can_remove() || !rec.been_read() {
                // second chance: advance without clearing the bit
                self.hand = self.store.next(idx);
                continue;
            }
            if dirty.iter().any(|r| r.pos() == rec.pos()) {
                self.hand = self.store.next(idx);
                continue;
            }
            rc -= 1;
            mem -= u64::from(rec.memory());
            self.hand = self.store.next(idx);
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
            dirty.sort_by_key(|rec| rec.pos());
            let saved = self.store.max_memory_words();
            self.store.set_max_memory_words(u64::MAX);
            let mut result = Ok(());
            for rec in &dirty {
                if let Err(err) = self.writer.write_back(rec) {
                    result = Err(err);
                    break;
                }
            }
            self.store.set_max_memory_words(saved);
            result?;
            for rec in &dirty {
                self.remove_record(rec.pos());
            }
        }
        Ok(())
    }
}

impl<R: PageRecord, W: CacheWriter<R>> PageCache<R> for ClockCache<R, W> {
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError> {
        Ok(self.store.find(pos))
    }

    fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.store.find(pos)
    }

    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError> {
        self.evict_if_required()?;
        let idx = self.store.insert(record);
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
                Ok(Some(existing))
            }
        }
    }

    fn remove(&mut self, pos: u32) -> bool {
        self.remove_record(pos)
    }

    fn clear(&mut self) {
        self.store.clear();
        self.hand = SENTINEL;
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

impl<R: PageRecord, W> core::fmt::Debug for ClockCache<R, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClockCache")
            .field("records", &self.store.record_count())
            .field("memory_kb", &self.store.memory_kb())
            .field("max_memory_kb", &self.store.max_memory_kb())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testutil::{page, unread_page, writer};

    #[test]
    fn flushes_one_sorted_batch() {
        let (log, w) = writer();
        let mut cache = ClockCache::new(w, 16).unwrap();
        for pos in 0..30 {
            cache.put(page(pos, 128)).unwrap();
        }
        assert_eq!(&*log.borrow(), "flush 0 1 2 3 4 5 6 7 ");
    }

    #[test]
    fn unread_records_get_a_second_chance() {
        let (log, w) = writer();
        let mut cache = ClockCache::new(w, 16).unwrap();
        for pos in 0..30 {
            cache.put(unread_page(pos, 128)).unwrap();
        }
        // nothing is removable: each pass flushes the log once, sweeps
        // twice, then gives up
        assert_eq!(&*log.borrow(), "flush flush ");
        assert_eq!(cache.all_changed().len(), 30);
    }

    #[test]
    fn get_does_not_reorder() {
        let (log, w) = writer();
        let mut cache = ClockCache::new(w, 16).unwrap();
        for pos in 0..28 {
            cache.put(page(pos, 128)).unwrap();
        }
        assert!(cache.get(5).unwrap().is_some());
        for pos in 28..30 {
            cache.put(page(pos, 128)).unwrap();
        }
        // position 5 is swept like any other record
        assert_eq!(&*log.borrow(), "flush 0 1 2 3 4 5 6 7 ");
    }

    #[test]
    fn hand_persists_across_passes_and_removals() {
        let (log, w) = writer();
        let mut cache = ClockCache::new(w, 16).unwrap();
        for pos in 0..30 {
            cache.put(page(pos, 128)).unwrap();
        }
        // first sweep stopped with the hand on position 8
        assert_eq!(&*log.borrow(), "flush 0 1 2 3 4 5 6 7 ");
        // removing the record under the hand steps it to position 9
        assert!(cache.remove(8));
        cache.set_max_memory(2).unwrap();
        assert_eq!(
            &*log.borrow(),
            "flush 0 1 2 3 4 5 6 7 flush 9 10 11 12 13 "
        );
    }
}
