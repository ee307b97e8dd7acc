//! Second-level cache giving evicted records a second chance.
//!
//! Wraps any base policy (selected with the `SOFT_` prefix in the factory)
//! with an unbounded backing map of weak references. Every record that passes
//! through the cache is also registered in the map; when the base evicts it,
//! the map entry survives for as long as the owning engine still holds a
//! strong reference. A `get` that misses the base probes the map and, on a
//! live upgrade, promotes the record back into the base.
//!
//! The map is bookkeeping only: it is not accounted against the primary
//! memory budget, and its dirty set is by definition empty (only records the
//! base already expelled live there). Dead references are swept
//! opportunistically during inserts.

extern crate alloc;

#[cfg(not(feature = "hashbrown"))]
extern crate std;

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

use crate::error::CacheError;
use crate::policy::PageCache;
use crate::record::PageRecord;

/// Inserts between reference sweeps of the backing map.
const SWEEP_INTERVAL: usize = 1024;

/// A base policy composed with a weak-referenced second level.
pub struct SecondLevelCache<R> {
    base: Box<dyn PageCache<R>>,
    map: HashMap<u32, Weak<R>>,
    inserts: usize,
}

impl<R: PageRecord> SecondLevelCache<R> {
    /// Wraps the given base cache.
    pub fn new(base: Box<dyn PageCache<R>>) -> Self {
        SecondLevelCache {
            base,
            map: HashMap::new(),
            inserts: 0,
        }
    }

    fn sweep_if_due(&mut self) {
        self.inserts += 1;
        if self.inserts % SWEEP_INTERVAL == 0 {
            self.map.retain(|_, weak| weak.strong_count() > 0);
        }
    }
}

impl<R: PageRecord> PageCache<R> for SecondLevelCache<R> {
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError> {
        if let Some(rec) = self.base.get(pos)? {
            return Ok(Some(rec));
        }
        match self.map.get(&pos).and_then(Weak::upgrade) {
            Some(rec) => {
                // still alive: promote it back into the first level
                self.base.put(Arc::clone(&rec))?;
                Ok(Some(rec))
            }
            None => {
                self.map.remove(&pos);
                Ok(None)
            }
        }
    }

    fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.base
            .find(pos)
            .or_else(|| self.map.get(&pos).and_then(Weak::upgrade))
    }

    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError> {
        self.sweep_if_due();
        self.map.insert(record.pos(), Arc::downgrade(&record));
        self.base.put(record)
    }

    fn update(&mut self, pos: u32, record: Arc<R>) -> Result<Option<Arc<R>>, CacheError> {
        self.map.insert(pos, Arc::downgrade(&record));
        self.base.update(pos, record)
    }

    fn remove(&mut self, pos: u32) -> bool {
        let in_base = self.base.remove(pos);
        let in_map = self.map.remove(&pos).is_some();
        in_base || in_map
    }

    fn clear(&mut self) {
        self.base.clear();
        self.map.clear();
    }

    fn set_max_memory(&mut self, max_kb: u32) -> Result<(), CacheError> {
        self.base.set_max_memory(max_kb)
    }

    fn max_memory_kb(&self) -> u32 {
        self.base.max_memory_kb()
    }

    fn memory_kb(&self) -> u32 {
        self.base.memory_kb()
    }

    fn all_changed(&self) -> Vec<Arc<R>> {
        self.base.all_changed()
    }
}

impl<R> core::fmt::Debug for SecondLevelCache<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecondLevelCache")
            .field("backing_entries", &self.map.len())
            .finish()
    }
}
