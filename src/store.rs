//! Shared skeleton of the page-cache policy family.
//!
//! Every replacement policy composes the same three pieces: a power-of-two
//! bucket array with singly linked chains for position lookup, a circular
//! doubly linked policy list threaded through a sentinel, and a memory
//! watermark in 4-byte words. The list nodes live in an index-based arena
//! owned by the store — buckets and links hold `u32` handles, the sentinel is
//! slot 0, and freed slots are recycled through a free list. Records
//! themselves are shared `Arc`s; the store never aliases a record with its
//! policy links.
//!
//! **Note**: This module is internal infrastructure. The policy caches in
//! [`lru`](crate::lru), [`mru`](crate::mru), [`clock`](crate::clock) and
//! [`random`](crate::random) drive it; library consumers never see it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::CacheError;
use crate::record::{kb_to_words, words_to_kb, CacheWriter, PageRecord, BUCKET_SLOT_WORDS};

/// Handle of the list sentinel. The sentinel is never evicted, reordered or
/// returned to the free list.
pub(crate) const SENTINEL: u32 = 0;

/// Null handle for bucket chains and unlinked list slots.
pub(crate) const NIL: u32 = u32::MAX;

struct Node<R> {
    /// `None` only for the sentinel and for freed slots.
    rec: Option<Arc<R>>,
    prev: u32,
    next: u32,
    /// Bucket chain link.
    chain: u32,
}

/// Bucket array + policy list + memory accounting, shared by all policies.
pub(crate) struct RecordStore<R> {
    nodes: Vec<Node<R>>,
    free: Vec<u32>,
    buckets: Box<[u32]>,
    mask: u32,
    record_count: usize,
    /// Current memory in 4-byte words, including the bucket-array overhead.
    memory: u64,
    /// Watermark in 4-byte words. Temporarily raised to `u64::MAX` during a
    /// write-back pass.
    max_memory: u64,
}

impl<R: PageRecord> RecordStore<R> {
    /// Sizes the bucket array for the given watermark and charges its
    /// overhead. Fails when the bucket count would not fit the index space.
    pub(crate) fn new(max_kb: u32) -> Result<Self, CacheError> {
        let max_memory = kb_to_words(max_kb);
        let wanted = max_memory / 64;
        if wanted > i32::MAX as u64 {
            return Err(CacheError::UnsupportedCacheSize { max_kb });
        }
        let len = (wanted as usize).next_power_of_two().max(1);
        Ok(RecordStore {
            nodes: vec![Node {
                rec: None,
                prev: SENTINEL,
                next: SENTINEL,
                chain: NIL,
            }],
            free: Vec::new(),
            buckets: vec![NIL; len].into_boxed_slice(),
            mask: (len - 1) as u32,
            record_count: 0,
            memory: len as u64 * BUCKET_SLOT_WORDS,
            max_memory,
        })
    }

    #[inline]
    pub(crate) fn record_count(&self) -> usize {
        self.record_count
    }

    #[inline]
    pub(crate) fn memory_words(&self) -> u64 {
        self.memory
    }

    #[inline]
    pub(crate) fn max_memory_words(&self) -> u64 {
        self.max_memory
    }

    #[inline]
    pub(crate) fn memory_kb(&self) -> u32 {
        words_to_kb(self.memory)
    }

    #[inline]
    pub(crate) fn max_memory_kb(&self) -> u32 {
        words_to_kb(self.max_memory)
    }

    /// Sets the watermark directly, in words. Used both by `set_max_memory`
    /// and to disarm eviction during a write-back pass.
    #[inline]
    pub(crate) fn set_max_memory_words(&mut self, words: u64) {
        self.max_memory = words;
    }

    #[inline]
    pub(crate) fn next(&self, idx: u32) -> u32 {
        self.nodes[idx as usize].next
    }

    #[inline]
    pub(crate) fn prev(&self, idx: u32) -> u32 {
        self.nodes[idx as usize].prev
    }

    /// The record held by a live, non-sentinel slot.
    #[inline]
    pub(crate) fn record(&self, idx: u32) -> &Arc<R> {
        self.nodes[idx as usize]
            .rec
            .as_ref()
            .expect("sentinel or freed slot has no record")
    }

    pub(crate) fn find_idx(&self, pos: u32) -> Option<u32> {
        let mut idx = self.buckets[(pos & self.mask) as usize];
        while idx != NIL {
            let node = &self.nodes[idx as usize];
            let rec = node
                .rec
                .as_ref()
                .expect("bucket chain reached a freed slot");
            if rec.pos() == pos {
                return Some(idx);
            }
            idx = node.chain;
        }
        None
    }

    pub(crate) fn find(&self, pos: u32) -> Option<Arc<R>> {
        self.find_idx(pos).map(|idx| Arc::clone(self.record(idx)))
    }

    /// Chains the record into its bucket and charges its memory. The slot is
    /// not linked into the policy list; the caller decides where it goes.
    pub(crate) fn insert(&mut self, rec: Arc<R>) -> u32 {
        let pos = rec.pos();
        #[cfg(feature = "check")]
        assert!(
            self.find_idx(pos).is_none(),
            "record already cached at position {pos}"
        );
        let bucket = (pos & self.mask) as usize;
        self.memory += u64::from(rec.memory());
        self.record_count += 1;
        let node = Node {
            rec: Some(rec),
            prev: NIL,
            next: NIL,
            chain: self.buckets[bucket],
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        self.buckets[bucket] = idx;
        idx
    }

    /// Links a detached slot at the most-recently-used end of the list.
    pub(crate) fn link_front(&mut self, idx: u32) {
        debug_assert_ne!(idx, SENTINEL, "tried to move the sentinel");
        let last = self.nodes[SENTINEL as usize].prev;
        self.nodes[idx as usize].next = SENTINEL;
        self.nodes[idx as usize].prev = last;
        self.nodes[last as usize].next = idx;
        self.nodes[SENTINEL as usize].prev = idx;
    }

    /// Links a detached slot at the least-recently-used end of the list.
    pub(crate) fn link_back(&mut self, idx: u32) {
        debug_assert_ne!(idx, SENTINEL, "tried to move the sentinel");
        let first = self.nodes[SENTINEL as usize].next;
        self.nodes[idx as usize].prev = SENTINEL;
        self.nodes[idx as usize].next = first;
        self.nodes[first as usize].prev = idx;
        self.nodes[SENTINEL as usize].next = idx;
    }

    /// Detaches a slot from the policy list, clearing its links.
    pub(crate) fn unlink(&mut self, idx: u32) {
        debug_assert_ne!(idx, SENTINEL, "tried to unlink the sentinel");
        let (prev, next) = {
            let node = &self.nodes[idx as usize];
            (node.prev, node.next)
        };
        if prev == NIL && next == NIL {
            return;
        }
        self.nodes[prev as usize].next = next;
        self.nodes[next as usize].prev = prev;
        let node = &mut self.nodes[idx as usize];
        node.prev = NIL;
        node.next = NIL;
    }

    /// Removes the record at `pos`: bucket unchain, list unlink, accounting,
    /// slot recycled. Returns false when the position is not cached.
    pub(crate) fn remove(&mut self, pos: u32) -> bool {
        let bucket = (pos & self.mask) as usize;
        let mut idx = self.buckets[bucket];
        let mut last = NIL;
        loop {
            if idx == NIL {
                return false;
            }
            let node = &self.nodes[idx as usize];
            let rec = node
                .rec
                .as_ref()
                .expect("bucket chain reached a freed slot");
            if rec.pos() == pos {
                break;
            }
            last = idx;
            idx = node.chain;
        }
        let chain = self.nodes[idx as usize].chain;
        if last == NIL {
            self.buckets[bucket] = chain;
        } else {
            self.nodes[last as usize].chain = chain;
        }
        self.unlink(idx);
        let node = &mut self.nodes[idx as usize];
        let rec = node.rec.take().expect("removing a freed slot");
        node.chain = NIL;
        self.record_count -= 1;
        self.memory -= u64::from(rec.memory());
        self.free.push(idx);
        #[cfg(feature = "check")]
        assert!(
            self.find_idx(pos).is_none(),
            "record still reachable after removal at position {pos}"
        );
        true
    }

    /// Drops every record and resets the counters. The bucket count is kept.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node {
            rec: None,
            prev: SENTINEL,
            next: SENTINEL,
            chain: NIL,
        });
        self.free.clear();
        self.buckets.fill(NIL);
        self.record_count = 0;
        self.memory = self.buckets.len() as u64 * BUCKET_SLOT_WORDS;
    }

    /// Walks `n` steps from the sentinel towards the least-recently-used end.
    /// Landing on the sentinel yields its successor instead.
    pub(crate) fn nth_from_oldest(&self, n: u32) -> u32 {
        let mut idx = SENTINEL;
        for _ in 0..n {
            idx = self.next(idx);
        }
        if idx == SENTINEL {
            idx = self.next(idx);
        }
        idx
    }

    /// Snapshot of the dirty records, in list order starting from the
    /// least-recently-used end.
    pub(crate) fn all_changed(&self) -> Vec<Arc<R>> {
        let mut out = Vec::new();
        let mut idx = self.next(SENTINEL);
        while idx != SENTINEL {
            let rec = self.record(idx);
            if rec.is_changed() {
                out.push(Arc::clone(rec));
            }
            idx = self.next(idx);
        }
        out
    }
}

/// Grouped write-back of an eviction pass's buffered dirty records.
///
/// The buffer is sorted by ascending position for I/O locality, the watermark
/// is raised so write-back side effects cannot re-enter eviction, and it is
/// restored even when the writer fails. Records are removed only after the
/// whole buffer persisted; on failure they all stay cached.
pub(crate) fn write_back_dirty<R: PageRecord, W: CacheWriter<R>>(
    store: &mut RecordStore<R>,
    writer: &mut W,
    mut dirty: Vec<Arc<R>>,
) -> Result<(), CacheError> {
    dirty.sort_by_key(|rec| rec.pos());
    dirty.dedup_by_key(|rec| rec.pos());
    let saved = store.max_memory_words();
    store.set_max_memory_words(u64::MAX);
    let mut result = Ok(());
    for rec in &dirty {
        if let Err(err) = writer.write_back(rec) {
            result = Err(err);
            break;
        }
    }
    store.set_max_memory_words(saved);
    result?;
    for rec in &dirty {
        store.remove(rec.pos());
    }
    Ok(())
}
