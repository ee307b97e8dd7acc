//! Concurrent scan-resistant cache over 64-bit keys (LIRS approximation).
//!
//! Meant for objects that are relatively costly to acquire, for example file
//! content. Each entry is assigned a distinct memory cost and the cache
//! tries to stay below a configured total. The replacement policy is an
//! approximation of LIRS (Low Inter-reference Recency Set, Zhang & Jiang)
//! with two adjustments: an additional bounded queue holds non-resident
//! entries so bookkeeping memory stays limited, and accessed hot entries are
//! only reshuffled to the stack top after a configurable number of other
//! entries have moved there ([`stack_move_distance`]), which batches writes
//! on the hottest entries.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    LirsCache<V>                               │
//! │                                                               │
//! │  ┌──────────┐ ┌──────────┐       ┌──────────┐                 │
//! │  │Segment 0 │ │Segment 1 │  ...  │Segment N │   N = 2^k       │
//! │  │[RwLock]  │ │[RwLock]  │       │[RwLock]  │                 │
//! │  └──────────┘ └──────────┘       └──────────┘                 │
//! │       ▲  segment = high bits of mixed key hash                │
//! │       │                                                       │
//! │  per segment: bucket array + stack + queue + queue2           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Within a segment every entry is in one of three classes:
//!
//! - **hot**: resident, recently reused; lives on the stack only
//! - **cold (resident)**: on the resident queue, possibly also on the stack
//! - **cold (non-resident)**: value replaced by a weak reference; on the
//!   non-resident queue, possibly also on the stack
//!
//! About 3 % of the resident entries are kept cold; the stack tail is always
//! hot. A non-resident entry whose weak reference is still alive when it is
//! re-accessed is upgraded back to resident without refetching.
//!
//! # Concurrency
//!
//! Segments are independently locked with `parking_lot::RwLock`. Mutating
//! operations (`get` included — it adjusts recency) take one segment's write
//! lock; probes such as [`peek`](LirsCache::peek),
//! [`contains_key`](LirsCache::contains_key) and the aggregate statistics
//! take read locks, one segment at a time. There is no cross-segment
//! ordering guarantee: a concurrent reader's view of the global totals may
//! be momentarily inconsistent, never unsafe.
//!
//! # Example
//!
//! ```
//! use pagecache_rs::config::LirsConfig;
//! use pagecache_rs::LirsCache;
//!
//! let cache: LirsCache<&str> = LirsCache::new(LirsConfig {
//!     max_memory: 16 * 1024,
//!     ..LirsConfig::default()
//! })
//! .unwrap();
//!
//! cache.put_with_memory(1, "one", 100);
//! assert_eq!(cache.peek(1).as_deref(), Some(&"one"));
//! assert_eq!(cache.get_memory(1), 100);
//! ```
//!
//! [`stack_move_distance`]: crate::config::LirsConfig::stack_move_distance

extern crate alloc;

#[cfg(not(feature = "hashbrown"))]
extern crate std;

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "hashbrown")]
use hashbrown::{HashMap, HashSet};
#[cfg(not(feature = "hashbrown"))]
use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::config::LirsConfig;
use crate::error::CacheError;

/// Null handle for intrusive links and bucket chains.
const NIL: u32 = u32::MAX;

/// Arena slot of the stack head.
const STACK: u32 = 0;
/// Arena slot of the resident-cold queue head.
const QUEUE: u32 = 1;
/// Arena slot of the non-resident queue head.
const QUEUE2: u32 = 2;

/// Initial bucket count of a fresh segment.
const INITIAL_MAP_LEN: usize = 8;

/// Mixes a key into a well-distributed 32-bit hash. The supplemental rounds
/// protect against key sets that differ only in a few bits.
fn key_hash(key: u64) -> u32 {
    let mut h = ((key >> 32) ^ key) as u32;
    h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
    h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
    (h >> 16) ^ h
}

/// One mapping slot. Classification is derived from the links: hot entries
/// are on no queue, resident cold entries hold a value and a queue link,
/// non-resident entries hold only a weak reference.
struct Entry<V> {
    key: u64,
    /// The value. `None` for non-resident entries and the heads.
    value: Option<Arc<V>>,
    /// Weak reference to the former value. `Some` only for non-resident
    /// entries.
    reference: Option<Weak<V>>,
    /// The entry cost in caller-chosen units.
    memory: u64,
    /// Stack-move counter value at the last promotion to the stack top.
    top_move: u64,
    stack_prev: u32,
    stack_next: u32,
    queue_prev: u32,
    queue_next: u32,
    /// Bucket chain link.
    map_next: u32,
}

impl<V> Entry<V> {
    fn head() -> Self {
        Entry {
            key: 0,
            value: None,
            reference: None,
            memory: 0,
            top_move: 0,
            stack_prev: NIL,
            stack_next: NIL,
            queue_prev: NIL,
            queue_next: NIL,
            map_next: NIL,
        }
    }

    fn new(key: u64, value: Arc<V>, memory: u64) -> Self {
        Entry {
            key,
            value: Some(value),
            reference: None,
            memory,
            top_move: 0,
            stack_prev: NIL,
            stack_next: NIL,
            queue_prev: NIL,
            queue_next: NIL,
            map_next: NIL,
        }
    }

    /// Hot entries are on no queue. The stack head also classifies as hot,
    /// which is what stops the prune loop.
    #[inline]
    fn is_hot(&self) -> bool {
        self.queue_next == NIL
    }

    /// The value if resident, otherwise whatever the weak reference still
    /// yields.
    fn live_value(&self) -> Option<Arc<V>> {
        self.value
            .clone()
            .or_else(|| self.reference.as_ref().and_then(Weak::upgrade))
    }

    /// Non-resident entries weigh nothing.
    #[inline]
    fn resident_memory(&self) -> u64 {
        if self.value.is_some() {
            self.memory
        } else {
            0
        }
    }
}

/// One LIRS cache: bucket array, recency stack, the two cold queues and the
/// counters. All access goes through the owning [`LirsCache`]'s per-segment
/// lock.
struct Segment<V> {
    /// Entry arena. Slots 0..2 are the stack, queue and queue2 heads.
    entries: Vec<Entry<V>>,
    free: Vec<u32>,
    /// The bucket array; the length is always a power of two.
    buckets: Box<[u32]>,
    mask: u32,
    /// Number of hot, cold and non-resident entries.
    map_size: usize,
    /// Number of resident cold entries.
    queue_size: usize,
    /// Number of non-resident entries.
    queue2_size: usize,
    stack_size: usize,
    /// Memory of the resident entries.
    used_memory: u64,
    max_memory: u64,
    hits: u64,
    misses: u64,
    /// Incremented whenever an entry moves to the stack top.
    stack_move_counter: u64,
    stack_move_distance: u64,
    non_resident_queue_size: u64,
    non_resident_queue_size_high: u64,
}

impl<V> Segment<V> {
    fn new(
        max_memory: u64,
        stack_move_distance: u64,
        len: usize,
        non_resident_queue_size: u64,
        non_resident_queue_size_high: u64,
    ) -> Self {
        let mut entries = Vec::with_capacity(len.min(64) + 3);
        for _ in 0..3 {
            entries.push(Entry::head());
        }
        entries[STACK as usize].stack_prev = STACK;
        entries[STACK as usize].stack_next = STACK;
        entries[QUEUE as usize].queue_prev = QUEUE;
        entries[QUEUE as usize].queue_next = QUEUE;
        entries[QUEUE2 as usize].queue_prev = QUEUE2;
        entries[QUEUE2 as usize].queue_next = QUEUE2;
        Segment {
            entries,
            free: Vec::new(),
            buckets: vec![NIL; len].into_boxed_slice(),
            mask: (len - 1) as u32,
            map_size: 0,
            queue_size: 0,
            queue2_size: 0,
            stack_size: 0,
            used_memory: 0,
            max_memory,
            hits: 0,
            misses: 0,
            stack_move_counter: 0,
            stack_move_distance,
            non_resident_queue_size,
            non_resident_queue_size_high,
        }
    }

    /// Rebuilds a segment with a new bucket count, replaying the stack from
    /// bottom to top and then the two queues from tail to front so every
    /// entry keeps its classification and order.
    fn resized(old: &Self, len: usize) -> Self {
        let mut seg = Segment::new(
            old.max_memory,
            old.stack_move_distance,
            len,
            old.non_resident_queue_size,
            old.non_resident_queue_size_high,
        );
        seg.hits = old.hits;
        seg.misses = old.misses;
        let mut i = old.entry(STACK).stack_prev;
        while i != STACK {
            let idx = seg.copy_into_map(old.entry(i));
            seg.add_to_stack(idx);
            i = old.entry(i).stack_prev;
        }
        for head in [QUEUE, QUEUE2] {
            let mut i = old.entry(head).queue_prev;
            while i != head {
                let e = old.entry(i);
                let idx = match seg.find(e.key, key_hash(e.key)) {
                    Some(idx) => idx,
                    None => seg.copy_into_map(e),
                };
                seg.add_to_queue(head, idx);
                i = old.entry(i).queue_prev;
            }
        }
        seg
    }

    #[inline]
    fn entry(&self, idx: u32) -> &Entry<V> {
        &self.entries[idx as usize]
    }

    #[inline]
    fn entry_mut(&mut self, idx: u32) -> &mut Entry<V> {
        &mut self.entries[idx as usize]
    }

    fn alloc(&mut self, entry: Entry<V>) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx as usize] = entry;
                idx
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as u32
            }
        }
    }

    fn free_slot(&mut self, idx: u32) {
        self.entries[idx as usize] = Entry::head();
        self.free.push(idx);
    }

    /// Clones an entry from another segment into this one's map, charging
    /// its resident memory.
    fn copy_into_map(&mut self, e: &Entry<V>) -> u32 {
        let copy = Entry {
            key: e.key,
            value: e.value.clone(),
            reference: e.reference.clone(),
            memory: e.memory,
            top_move: 0,
            stack_prev: NIL,
            stack_next: NIL,
            queue_prev: NIL,
            queue_next: NIL,
            map_next: NIL,
        };
        let resident = copy.resident_memory();
        let idx = self.alloc(copy);
        let bucket = (key_hash(self.entry(idx).key) & self.mask) as usize;
        self.entry_mut(idx).map_next = self.buckets[bucket];
        self.buckets[bucket] = idx;
        self.used_memory += resident;
        self.map_size += 1;
        idx
    }

    /// The new bucket count if the map should be resized, at most 75 % and
    /// at least 12 % full.
    fn new_map_len(&self) -> Option<usize> {
        let len = (self.mask as usize) + 1;
        if len * 3 < self.map_size * 4 && len < (1 << 28) {
            Some(len * 2)
        } else if len > 32 && len / 8 > self.map_size {
            Some(len / 2)
        } else {
            None
        }
    }

    fn find(&self, key: u64, hash: u32) -> Option<u32> {
        let mut idx = self.buckets[(hash & self.mask) as usize];
        while idx != NIL {
            let e = self.entry(idx);
            if e.key == key {
                return Some(idx);
            }
            idx = e.map_next;
        }
        None
    }

    /// Resolves a lookup, counting the hit or miss and adjusting recency on
    /// a hit. A non-resident entry whose weak reference died counts as a
    /// miss.
    fn get(&mut self, idx: Option<u32>) -> Option<Arc<V>> {
        let value = idx.and_then(|i| self.entry(i).live_value());
        match value {
            Some(value) => {
                self.access(idx.expect("hit without an entry"));
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Records an access: hot entries are reshuffled to the stack top once
    /// the move distance is exceeded; cold entries are promoted, upgrading a
    /// non-resident entry whose weak reference is still alive.
    fn access(&mut self, idx: u32) {
        if self.entry(idx).is_hot() {
            if idx != self.entry(STACK).stack_next && self.entry(idx).stack_next != NIL {
                if self.stack_move_counter - self.entry(idx).top_move > self.stack_move_distance {
                    let was_end = idx == self.entry(STACK).stack_prev;
                    self.remove_from_stack(idx);
                    if was_end {
                        // the new tail could be cold, which is not allowed
                        self.prune_stack();
                    }
                    self.add_to_stack(idx);
                }
            }
        } else {
            let Some(value) = self.entry(idx).live_value() else {
                return;
            };
            self.remove_from_queue(idx);
            if self.entry(idx).reference.is_some() {
                // the weak reference survived: upgrade back to resident
                let memory = self.entry(idx).memory;
                let e = self.entry_mut(idx);
                e.value = Some(value);
                e.reference = None;
                self.used_memory += memory;
            }
            if self.entry(idx).stack_next != NIL {
                // cold entries on the stack become hot on reuse,
                // so a hot entry has to make room
                self.remove_from_stack(idx);
                self.convert_oldest_hot_to_cold();
            } else {
                // cold entries that are not on the stack
                // move to the front of the queue
                self.add_to_queue(QUEUE, idx);
            }
            self.add_to_stack(idx);
            self.prune_stack();
        }
    }

    /// Adds or replaces an entry. A replaced or re-inserted key is promoted
    /// to hot by the recency-repeat rule; a brand-new entry enters cold when
    /// the cache is full. Returns the previously resident value.
    fn put(&mut self, key: u64, hash: u32, value: Arc<V>, memory: u64) -> Option<Arc<V>> {
        let existing = self.find(key, hash);
        let existed = existing.is_some();
        let mut old = None;
        if let Some(idx) = existing {
            old = self.entry(idx).live_value();
            self.remove(key, hash);
        }
        if memory > self.max_memory {
            // the new entry is too big to fit
            return old;
        }
        let idx = self.alloc(Entry::new(key, value, memory));
        let bucket = (hash & self.mask) as usize;
        self.entry_mut(idx).map_next = self.buckets[bucket];
        self.buckets[bucket] = idx;
        self.used_memory += memory;
        if self.used_memory > self.max_memory {
            self.evict();
            // if the cache is full, the new entry is cold if possible
            if self.stack_size > 0 {
                self.add_to_queue(QUEUE, idx);
            }
        }
        self.map_size += 1;
        // added entries always join the stack
        self.add_to_stack(idx);
        if existed {
            // it was here before (even non-resident): it becomes hot
            self.access(idx);
        }
        old
    }

    /// Removes an entry of any class. Removing a hot entry promotes the
    /// oldest resident-cold entry to the stack bottom so the hot count is
    /// preserved.
    fn remove(&mut self, key: u64, hash: u32) -> Option<Arc<V>> {
        let bucket = (hash & self.mask) as usize;
        let mut idx = self.buckets[bucket];
        let mut last = NIL;
        loop {
            if idx == NIL {
                return None;
            }
            if self.entry(idx).key == key {
                break;
            }
            last = idx;
            idx = self.entry(idx).map_next;
        }
        let chain = self.entry(idx).map_next;
        if last == NIL {
            self.buckets[bucket] = chain;
        } else {
            self.entry_mut(last).map_next = chain;
        }
        let old = self.entry(idx).live_value();
        self.map_size -= 1;
        self.used_memory -= self.entry(idx).resident_memory();
        if self.entry(idx).stack_next != NIL {
            self.remove_from_stack(idx);
        }
        if self.entry(idx).is_hot() {
            // promote the oldest cold entry so the hot count is stable
            let oldest = self.entry(QUEUE).queue_prev;
            if oldest != QUEUE {
                self.remove_from_queue(oldest);
                if self.entry(oldest).stack_next == NIL {
                    self.add_to_stack_bottom(oldest);
                }
            }
            self.prune_stack();
        } else {
            self.remove_from_queue(idx);
        }
        self.free_slot(idx);
        old
    }

    /// Evicts cold entries until the memory limit is met again.
    fn evict(&mut self) {
        loop {
            self.evict_block();
            if self.used_memory <= self.max_memory {
                break;
            }
            if self.queue_size == 0 && self.stack_size == 0 {
                break;
            }
        }
    }

    fn evict_block(&mut self) {
        // keep at least ~3% of the resident entries cold: if fewer, the
        // oldest hot entry becomes cold
        while self.queue_size <= ((self.map_size - self.queue2_size) >> 5) && self.stack_size > 0 {
            self.convert_oldest_hot_to_cold();
        }
        // the oldest resident cold entries become non-resident
        while self.used_memory > self.max_memory && self.queue_size > 0 {
            let idx = self.entry(QUEUE).queue_prev;
            self.used_memory -= self.entry(idx).memory;
            self.remove_from_queue(idx);
            let value = self
                .entry_mut(idx)
                .value
                .take()
                .expect("resident queue held a non-resident entry");
            self.entry_mut(idx).reference = Some(Arc::downgrade(&value));
            drop(value);
            self.add_to_queue(QUEUE2, idx);
            self.trim_non_resident_queue();
        }
    }

    /// Caps the non-resident queue relative to the resident entry count.
    /// Between the low and high watermarks an entry whose weak reference is
    /// still alive stops the trim, keeping its second chance.
    fn trim_non_resident_queue(&mut self) {
        let resident = (self.map_size - self.queue2_size) as u64;
        let max_high = self.non_resident_queue_size_high * resident;
        let max_low = self.non_resident_queue_size * resident;
        while self.queue2_size as u64 > max_low {
            let idx = self.entry(QUEUE2).queue_prev;
            if self.queue2_size as u64 <= max_high {
                let alive = self
                    .entry(idx)
                    .reference
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .is_some();
                if alive {
                    break;
                }
            }
            let key = self.entry(idx).key;
            self.remove(key, key_hash(key));
        }
    }

    fn convert_oldest_hot_to_cold(&mut self) {
        // the stack tail is known to be hot
        let last = self.entry(STACK).stack_prev;
        assert_ne!(last, STACK, "no hot entry left to convert");
        self.remove_from_stack(last);
        // joining the queue makes it cold
        self.add_to_queue(QUEUE, last);
        self.prune_stack();
    }

    /// Strips cold entries off the stack tail until the tail is hot again.
    fn prune_stack(&mut self) {
        loop {
            let last = self.entry(STACK).stack_prev;
            // the stack head itself classifies as hot, so this terminates
            if self.entry(last).is_hot() {
                break;
            }
            // the cold entry is still on its queue
            self.remove_from_stack(last);
        }
    }

    fn add_to_stack(&mut self, idx: u32) {
        let first = self.entry(STACK).stack_next;
        self.entry_mut(idx).stack_prev = STACK;
        self.entry_mut(idx).stack_next = first;
        self.entry_mut(first).stack_prev = idx;
        self.entry_mut(STACK).stack_next = idx;
        self.stack_size += 1;
        let top_move = self.stack_move_counter;
        self.stack_move_counter += 1;
        self.entry_mut(idx).top_move = top_move;
    }

    fn add_to_stack_bottom(&mut self, idx: u32) {
        let last = self.entry(STACK).stack_prev;
        self.entry_mut(idx).stack_next = STACK;
        self.entry_mut(idx).stack_prev = last;
        self.entry_mut(last).stack_next = idx;
        self.entry_mut(STACK).stack_prev = idx;
        self.stack_size += 1;
    }

    fn remove_from_stack(&mut self, idx: u32) {
        let (prev, next) = {
            let e = self.entry(idx);
            (e.stack_prev, e.stack_next)
        };
        self.entry_mut(prev).stack_next = next;
        self.entry_mut(next).stack_prev = prev;
        self.entry_mut(idx).stack_prev = NIL;
        self.entry_mut(idx).stack_next = NIL;
        self.stack_size -= 1;
    }

    fn add_to_queue(&mut self, head: u32, idx: u32) {
        let first = self.entry(head).queue_next;
        self.entry_mut(idx).queue_prev = head;
        self.entry_mut(idx).queue_next = first;
        self.entry_mut(first).queue_prev = idx;
        self.entry_mut(head).queue_next = idx;
        if self.entry(idx).value.is_some() {
            self.queue_size += 1;
        } else {
            self.queue2_size += 1;
        }
    }

    fn remove_from_queue(&mut self, idx: u32) {
        let (prev, next) = {
            let e = self.entry(idx);
            (e.queue_prev, e.queue_next)
        };
        self.entry_mut(prev).queue_next = next;
        self.entry_mut(next).queue_prev = prev;
        self.entry_mut(idx).queue_prev = NIL;
        self.entry_mut(idx).queue_next = NIL;
        if self.entry(idx).value.is_some() {
            self.queue_size -= 1;
        } else {
            self.queue2_size -= 1;
        }
    }

    /// Keys of one class: the stack for `cold == false`, otherwise one of
    /// the two cold queues.
    fn keys(&self, cold: bool, non_resident: bool) -> Vec<u64> {
        let mut keys = Vec::new();
        if cold {
            let head = if non_resident { QUEUE2 } else { QUEUE };
            let mut idx = self.entry(head).queue_next;
            while idx != head {
                keys.push(self.entry(idx).key);
                idx = self.entry(idx).queue_next;
            }
        } else {
            let mut idx = self.entry(STACK).stack_next;
            while idx != STACK {
                keys.push(self.entry(idx).key);
                idx = self.entry(idx).stack_next;
            }
        }
        keys
    }

    /// Keys of all resident entries.
    fn key_set(&self, out: &mut HashSet<u64>) {
        let mut idx = self.entry(STACK).stack_next;
        while idx != STACK {
            out.insert(self.entry(idx).key);
            idx = self.entry(idx).stack_next;
        }
        let mut idx = self.entry(QUEUE).queue_next;
        while idx != QUEUE {
            out.insert(self.entry(idx).key);
            idx = self.entry(idx).queue_next;
        }
    }
}

/// A concurrent scan-resistant cache mapping `u64` keys to shared values.
///
/// See the [module documentation](self) for the replacement policy. Values
/// are handed out as `Arc<V>`; a value evicted to non-resident state can be
/// resurrected for as long as some caller still holds its `Arc`.
pub struct LirsCache<V> {
    segments: Box<[RwLock<Segment<V>>]>,
    max_memory: AtomicU64,
    segment_shift: u32,
    segment_mask: u32,
    stack_move_distance: u32,
    non_resident_queue_size: u32,
    non_resident_queue_size_high: u32,
}

impl<V> LirsCache<V> {
    /// Creates a cache from the given configuration.
    pub fn new(config: LirsConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let segment_count = config.segment_count;
        let per_segment = (config.max_memory / u64::from(segment_count)).max(1);
        let segments: Vec<RwLock<Segment<V>>> = (0..segment_count)
            .map(|_| {
                RwLock::new(Segment::new(
                    per_segment,
                    u64::from(config.stack_move_distance),
                    INITIAL_MAP_LEN,
                    u64::from(config.non_resident_queue_size),
                    u64::from(config.non_resident_queue_size_high),
                ))
            })
            .collect();
        Ok(LirsCache {
            segments: segments.into_boxed_slice(),
            max_memory: AtomicU64::new(config.max_memory),
            // the high bits select the segment
            segment_shift: 32 - segment_count.trailing_zeros(),
            segment_mask: segment_count - 1,
            stack_move_distance: config.stack_move_distance,
            non_resident_queue_size: config.non_resident_queue_size,
            non_resident_queue_size_high: config.non_resident_queue_size_high,
        })
    }

    #[inline]
    fn segment_index(&self, hash: u32) -> usize {
        // a shift of 32 (single segment) must behave like the mask alone
        (hash.wrapping_shr(self.segment_shift) & self.segment_mask) as usize
    }

    fn per_segment_memory(&self) -> u64 {
        (self.max_memory.load(Ordering::Relaxed) / self.segments.len() as u64).max(1)
    }

    /// Replaces the segment behind the guard when its bucket array is due
    /// for resizing. Must run under the segment's write lock.
    fn resize_if_needed(guard: &mut Segment<V>) {
        if let Some(len) = guard.new_map_len() {
            let replacement = Segment::resized(guard, len);
            *guard = replacement;
        }
    }

    /// Looks up a key, adjusting the recency state on a hit.
    pub fn get(&self, key: u64) -> Option<Arc<V>> {
        let hash = key_hash(key);
        let mut seg = self.segments[self.segment_index(hash)].write();
        let idx = seg.find(key, hash);
        seg.get(idx)
    }

    /// Looks up a key without any side effects.
    pub fn peek(&self, key: u64) -> Option<Arc<V>> {
        let hash = key_hash(key);
        let seg = self.segments[self.segment_index(hash)].read();
        seg.find(key, hash).and_then(|idx| seg.entry(idx).live_value())
    }

    /// Whether a resident entry exists for the key. Non-resident entries do
    /// not count, even when their weak reference is still alive.
    pub fn contains_key(&self, key: u64) -> bool {
        let hash = key_hash(key);
        let seg = self.segments[self.segment_index(hash)].read();
        seg.find(key, hash)
            .map(|idx| seg.entry(idx).value.is_some())
            .unwrap_or(false)
    }

    /// The memory cost of the resident entry for the key, or 0.
    pub fn get_memory(&self, key: u64) -> u64 {
        let hash = key_hash(key);
        let seg = self.segments[self.segment_index(hash)].read();
        seg.find(key, hash)
            .map(|idx| seg.entry(idx).resident_memory())
            .unwrap_or(0)
    }

    /// Adds an entry with a memory cost of 1.
    pub fn put(&self, key: u64, value: V) -> Option<Arc<V>> {
        self.put_with_memory(key, value, 1)
    }

    /// Adds an entry. Returns the previously resident value under that key,
    /// if any. An entry whose cost exceeds a whole segment's share of the
    /// budget is not inserted (a prior entry is still replaced away).
    pub fn put_with_memory(&self, key: u64, value: V, memory: u64) -> Option<Arc<V>> {
        self.put_arc(key, Arc::new(value), memory)
    }

    /// [`put_with_memory`](Self::put_with_memory) for values the caller
    /// already shares.
    pub fn put_arc(&self, key: u64, value: Arc<V>, memory: u64) -> Option<Arc<V>> {
        let hash = key_hash(key);
        let mut seg = self.segments[self.segment_index(hash)].write();
        Self::resize_if_needed(&mut seg);
        seg.put(key, hash, value, memory)
    }

    /// Removes an entry of any class. Returns the previously resident value.
    pub fn remove(&self, key: u64) -> Option<Arc<V>> {
        let hash = key_hash(key);
        let mut seg = self.segments[self.segment_index(hash)].write();
        Self::resize_if_needed(&mut seg);
        seg.remove(key, hash)
    }

    /// Drops every entry. Counters and bucket arrays start over.
    pub fn clear(&self) {
        let per_segment = self.per_segment_memory();
        for seg in self.segments.iter() {
            *seg.write() = Segment::new(
                per_segment,
                u64::from(self.stack_move_distance),
                INITIAL_MAP_LEN,
                u64::from(self.non_resident_queue_size),
                u64::from(self.non_resident_queue_size_high),
            );
        }
    }

    /// Moves the memory limit. Entries are not evicted immediately; the next
    /// inserts converge each segment onto its new share.
    pub fn set_max_memory(&self, max_memory: u64) -> Result<(), CacheError> {
        if max_memory == 0 {
            return Err(CacheError::invalid_value("MAX_MEMORY", "0"));
        }
        self.max_memory.store(max_memory, Ordering::Relaxed);
        let per_segment = (max_memory / self.segments.len() as u64).max(1);
        for seg in self.segments.iter() {
            seg.write().max_memory = per_segment;
        }
        Ok(())
    }

    /// The configured memory limit.
    pub fn max_memory(&self) -> u64 {
        self.max_memory.load(Ordering::Relaxed)
    }

    /// Memory of all resident entries.
    pub fn used_memory(&self) -> u64 {
        self.segments.iter().map(|s| s.read().used_memory).sum()
    }

    /// Number of resident entries.
    pub fn size(&self) -> usize {
        self.segments
            .iter()
            .map(|s| {
                let s = s.read();
                s.map_size - s.queue2_size
            })
            .sum()
    }

    /// Number of hot entries.
    pub fn size_hot(&self) -> usize {
        self.segments
            .iter()
            .map(|s| {
                let s = s.read();
                s.map_size - s.queue_size - s.queue2_size
            })
            .sum()
    }

    /// Number of non-resident entries.
    pub fn size_non_resident(&self) -> usize {
        self.segments.iter().map(|s| s.read().queue2_size).sum()
    }

    /// Total bucket-array length across all segments.
    pub fn size_map_array(&self) -> usize {
        self.segments.iter().map(|s| s.read().buckets.len()).sum()
    }

    /// Number of cache hits.
    pub fn hits(&self) -> u64 {
        self.segments.iter().map(|s| s.read().hits).sum()
    }

    /// Number of cache misses.
    pub fn misses(&self) -> u64 {
        self.segments.iter().map(|s| s.read().misses).sum()
    }

    /// Whether no resident entry exists.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Keys of one entry class, segment by segment: the stack members for
    /// `cold == false`, otherwise the resident or non-resident cold queue.
    pub fn keys(&self, cold: bool, non_resident: bool) -> Vec<u64> {
        let mut keys = Vec::new();
        for seg in self.segments.iter() {
            keys.extend(seg.read().keys(cold, non_resident));
        }
        keys
    }

    /// Keys of all resident entries.
    pub fn key_set(&self) -> HashSet<u64> {
        let mut set = HashSet::new();
        for seg in self.segments.iter() {
            seg.read().key_set(&mut set);
        }
        set
    }

    /// Values of all resident entries.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.key_set()
            .into_iter()
            .filter_map(|key| self.peek(key))
            .collect()
    }

    /// Snapshot of the resident entries as a map.
    pub fn to_map(&self) -> HashMap<u64, Arc<V>> {
        self.key_set()
            .into_iter()
            .filter_map(|key| self.peek(key).map(|value| (key, value)))
            .collect()
    }

    /// Snapshot of the resident entries as key/value pairs.
    pub fn entries(&self) -> Vec<(u64, Arc<V>)> {
        self.to_map().into_iter().collect()
    }

    /// Adds every pair of the iterator with a memory cost of 1.
    pub fn put_all<I>(&self, iter: I)
    where
        I: IntoIterator<Item = (u64, V)>,
    {
        for (key, value) in iter {
            self.put(key, value);
        }
    }

    /// Trims every segment's non-resident queue to its watermark.
    pub fn trim_non_resident_queue(&self) {
        for seg in self.segments.iter() {
            seg.write().trim_non_resident_queue();
        }
    }
}

impl<V: PartialEq> LirsCache<V> {
    /// Whether some resident entry holds the given value.
    pub fn contains_value(&self, value: &V) -> bool {
        self.values().iter().any(|v| **v == *value)
    }
}

impl<V> core::fmt::Debug for LirsCache<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LirsCache")
            .field("segments", &self.segments.len())
            .field("max_memory", &self.max_memory())
            .field("used_memory", &self.used_memory())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_segment(max_memory: u64) -> LirsCache<u64> {
        LirsCache::new(LirsConfig {
            max_memory,
            segment_count: 1,
            ..LirsConfig::default()
        })
        .unwrap()
    }

    /// Structural invariants of every segment: the derived counters match
    /// the lists, resident memory adds up, and the stack tail is hot.
    fn check_segment(cache: &LirsCache<u64>) {
        for seg in cache.segments.iter() {
            let seg = seg.read();
            let mut stack_len = 0;
            let mut idx = seg.entry(STACK).stack_next;
            while idx != STACK {
                stack_len += 1;
                idx = seg.entry(idx).stack_next;
            }
            assert_eq!(stack_len, seg.stack_size);
            let mut queue_len = 0;
            let mut resident_cold_memory = 0;
            let mut idx = seg.entry(QUEUE).queue_next;
            while idx != QUEUE {
                assert!(seg.entry(idx).value.is_some());
                resident_cold_memory += seg.entry(idx).memory;
                queue_len += 1;
                idx = seg.entry(idx).queue_next;
            }
            assert_eq!(queue_len, seg.queue_size);
            let mut queue2_len = 0;
            let mut idx = seg.entry(QUEUE2).queue_next;
            while idx != QUEUE2 {
                assert!(seg.entry(idx).value.is_none());
                queue2_len += 1;
                idx = seg.entry(idx).queue_next;
            }
            assert_eq!(queue2_len, seg.queue2_size);
            // hot entries live on the stack only
            let mut hot_memory = 0;
            let mut hot_len = 0;
            let mut idx = seg.entry(STACK).stack_next;
            while idx != STACK {
                if seg.entry(idx).is_hot() {
                    hot_len += 1;
                    hot_memory += seg.entry(idx).memory;
                }
                idx = seg.entry(idx).stack_next;
            }
            assert_eq!(seg.map_size, hot_len + seg.queue_size + seg.queue2_size);
            assert_eq!(seg.used_memory, hot_memory + resident_cold_memory);
            // stack tail is hot (the head counts as hot for an empty stack)
            let tail = seg.entry(STACK).stack_prev;
            assert!(seg.entry(tail).is_hot());
        }
    }

    #[test]
    fn hash_is_deterministic_and_spreads_small_keys() {
        let mut seen = HashSet::new();
        for key in 0..64u64 {
            assert_eq!(key_hash(key), key_hash(key));
            seen.insert(key_hash(key));
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn put_peek_round_trip() {
        let cache = single_segment(100);
        assert!(cache.put_with_memory(1, 10, 1).is_none());
        assert_eq!(cache.peek(1).as_deref(), Some(&10));
        assert_eq!(cache.get(1).as_deref(), Some(&10));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);
        check_segment(&cache);
    }

    #[test]
    fn replacing_returns_the_old_value() {
        let cache = single_segment(100);
        cache.put_with_memory(1, 10, 1);
        let old = cache.put_with_memory(1, 11, 1).expect("old value");
        assert_eq!(*old, 10);
        assert_eq!(cache.peek(1).as_deref(), Some(&11));
        assert_eq!(cache.size(), 1);
        check_segment(&cache);
    }

    #[test]
    fn remove_forgets_the_key() {
        let cache = single_segment(100);
        cache.put_with_memory(1, 10, 1);
        assert_eq!(cache.remove(1).as_deref(), Some(&10));
        assert!(cache.peek(1).is_none());
        assert!(!cache.contains_key(1));
        assert!(cache.remove(1).is_none());
        assert!(cache.is_empty());
        check_segment(&cache);
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let cache = single_segment(10);
        assert!(cache.put_with_memory(1, 10, 11).is_none());
        assert!(!cache.contains_key(1));
        assert_eq!(cache.size(), 0);
        // the replaced entry is still removed and returned
        cache.put_with_memory(2, 20, 1);
        let old = cache.put_with_memory(2, 21, 11).expect("old value");
        assert_eq!(*old, 20);
        assert!(!cache.contains_key(2));
        check_segment(&cache);
    }

    #[test]
    fn filling_past_the_limit_demotes_to_non_resident() {
        let cache = single_segment(10);
        for key in 0..30 {
            cache.put_with_memory(key, key, 1);
            check_segment(&cache);
        }
        assert!(cache.used_memory() <= 10);
        assert_eq!(cache.size(), 10);
        assert!(cache.size_non_resident() > 0);
        // resident = hot + cold
        assert_eq!(
            cache.size(),
            cache.size_hot() + cache.keys(true, false).len()
        );
    }

    #[test]
    fn map_array_grows_with_the_entry_count() {
        let cache = single_segment(1_000_000);
        assert_eq!(cache.size_map_array(), INITIAL_MAP_LEN);
        for key in 0..100 {
            cache.put_with_memory(key, key, 1);
        }
        assert!(cache.size_map_array() >= 128);
        for key in 0..100 {
            assert_eq!(cache.peek(key).as_deref(), Some(&key), "key {key}");
        }
        check_segment(&cache);
    }

    #[test]
    fn map_array_shrinks_after_mass_removal() {
        let cache = single_segment(1_000_000);
        for key in 0..100 {
            cache.put_with_memory(key, key, 1);
        }
        for key in 0..100 {
            cache.remove(key);
        }
        // the next mutation under the lock halves the array step by step
        for _ in 0..4 {
            cache.remove(0);
        }
        assert!(cache.size_map_array() < 128);
        check_segment(&cache);
    }

    #[test]
    fn new_map_len_thresholds() {
        let mut seg: Segment<u64> = Segment::new(100, 32, 8, 3, 12);
        seg.map_size = 6;
        assert_eq!(seg.new_map_len(), None);
        seg.map_size = 7;
        assert_eq!(seg.new_map_len(), Some(16));
        let mut seg: Segment<u64> = Segment::new(100, 32, 64, 3, 12);
        seg.map_size = 7;
        assert_eq!(seg.new_map_len(), Some(32));
        seg.map_size = 8;
        assert_eq!(seg.new_map_len(), None);
    }

    #[test]
    fn clear_starts_over() {
        let cache = single_segment(100);
        for key in 0..50 {
            cache.put_with_memory(key, key, 1);
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.used_memory(), 0);
        assert_eq!(cache.size_non_resident(), 0);
        assert_eq!(cache.size_map_array(), INITIAL_MAP_LEN);
        check_segment(&cache);
    }

    #[test]
    fn views_agree() {
        let cache = single_segment(100);
        for key in 0..20 {
            cache.put_with_memory(key, key * 10, 1);
        }
        let set = cache.key_set();
        assert_eq!(set.len(), cache.size());
        let map = cache.to_map();
        assert_eq!(map.len(), cache.size());
        for (key, value) in &map {
            assert_eq!(**value, key * 10);
        }
        assert_eq!(cache.values().len(), cache.size());
        assert_eq!(cache.entries().len(), cache.size());
        assert!(cache.contains_value(&50));
        assert!(!cache.contains_value(&55));
    }

    #[test]
    fn put_all_copies_a_map() {
        let cache = single_segment(100);
        let mut source = HashMap::new();
        source.insert(1u64, 10u64);
        source.insert(2, 20);
        cache.put_all(source);
        assert_eq!(cache.peek(1).as_deref(), Some(&10));
        assert_eq!(cache.peek(2).as_deref(), Some(&20));
    }

    #[test]
    fn set_max_memory_rejects_zero() {
        let cache = single_segment(100);
        assert!(cache.set_max_memory(0).is_err());
        assert!(cache.set_max_memory(200).is_ok());
        assert_eq!(cache.max_memory(), 200);
    }
}
