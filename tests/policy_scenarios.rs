//! End-to-end eviction scenarios for the page-cache policy family.
//!
//! The writer records every call as a trailing space-separated log
//! (`flush_log` appends `"flush "`, `write_back` appends the position), so
//! each test pins down the exact victims and flush grouping of a policy.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use pagecache_rs::{open_cache, CacheError, CacheWriter, PageCache, PageRecord};

struct TestPage {
    pos: u32,
    memory: u32,
    changed: bool,
    removable: bool,
    read: bool,
}

impl PageRecord for TestPage {
    fn pos(&self) -> u32 {
        self.pos
    }
    fn memory(&self) -> u32 {
        self.memory
    }
    fn is_changed(&self) -> bool {
        self.changed
    }
    fn can_remove(&self) -> bool {
        self.removable
    }
    fn been_read(&self) -> bool {
        self.read
    }
}

fn page(pos: u32, memory: u32) -> Arc<TestPage> {
    Arc::new(TestPage {
        pos,
        memory,
        changed: true,
        removable: true,
        read: true,
    })
}

fn clean_page(pos: u32, memory: u32) -> Arc<TestPage> {
    Arc::new(TestPage {
        pos,
        memory,
        changed: false,
        removable: true,
        read: true,
    })
}

struct RecordingWriter {
    log: Rc<RefCell<String>>,
}

impl CacheWriter<TestPage> for RecordingWriter {
    fn flush_log(&mut self) -> Result<(), CacheError> {
        self.log.borrow_mut().push_str("flush ");
        Ok(())
    }

    fn write_back(&mut self, record: &TestPage) -> Result<(), CacheError> {
        write!(self.log.borrow_mut(), "{} ", record.pos()).unwrap();
        Ok(())
    }
}

fn recording_writer() -> (Rc<RefCell<String>>, RecordingWriter) {
    let log = Rc::new(RefCell::new(String::new()));
    (
        Rc::clone(&log),
        RecordingWriter {
            log: Rc::clone(&log),
        },
    )
}

fn cache_of(kind: &str, max_kb: u32) -> (Rc<RefCell<String>>, Box<dyn PageCache<TestPage>>) {
    let (log, writer) = recording_writer();
    (log, open_cache(writer, kind, max_kb).unwrap())
}

#[test]
fn lru_evicts_in_insertion_order() {
    let (log, mut cache) = cache_of("LRU", 16);
    for pos in 0..20 {
        cache.put(page(pos, 1024)).unwrap();
    }
    assert_eq!(&*log.borrow(), "flush 0 flush 1 flush 2 flush 3 ");
}

#[test]
fn mru_evicts_the_newest_first() {
    let (log, mut cache) = cache_of("MRU", 16);
    for pos in 0..20 {
        cache.put(page(pos, 1024)).unwrap();
    }
    assert_eq!(&*log.borrow(), "flush 15 flush 16 flush 17 flush 18 ");
}

#[test]
fn mru_with_interleaved_gets_evicts_the_touched_records() {
    let (log, mut cache) = cache_of("MRU", 16);
    for pos in 0..14 {
        cache.put(page(pos, 1024)).unwrap();
    }
    for i in 0..5 {
        assert!(cache.get(i).unwrap().is_some(), "get {i}");
        cache.put(page(i + 14, 1024)).unwrap();
    }
    assert_eq!(&*log.borrow(), "flush 2 flush 3 flush 4 ");
}

#[test]
fn clock_flushes_one_sorted_batch() {
    let (log, mut cache) = cache_of("Clock", 16);
    for pos in 0..30 {
        cache.put(page(pos, 128)).unwrap();
    }
    assert_eq!(&*log.borrow(), "flush 0 1 2 3 4 5 6 7 ");
}

#[test]
fn random_stays_quiet_below_the_watermark() {
    let (log, mut cache) = cache_of("Random", 16);
    for pos in 0..20 {
        cache.put(page(pos, 128)).unwrap();
    }
    assert!(log.borrow().is_empty());
    for pos in 0..20 {
        assert!(cache.find(pos).is_some(), "position {pos}");
    }
}

#[test]
fn random_evicts_down_to_the_minimum_record_count() {
    let (log, mut cache) = cache_of("Random", 16);
    for pos in 0..20 {
        cache.put(page(pos, 1024)).unwrap();
    }
    // the last four puts each ran a pass that stopped at the minimum
    // record count after expelling one random dirty victim
    assert!(log.borrow().starts_with("flush "));
    assert_eq!(log.borrow().split_whitespace().count(), 8);
    assert_eq!(cache.all_changed().len(), 16);
}

#[test]
fn fifo_keeps_insertion_order_despite_gets() {
    let (log, mut cache) = cache_of("FIFO", 16);
    for pos in 0..16 {
        cache.put(page(pos, 1024)).unwrap();
    }
    assert!(cache.get(0).unwrap().is_some());
    cache.put(page(16, 1024)).unwrap();
    assert_eq!(&*log.borrow(), "flush 0 ");
}

#[test]
fn put_then_find_returns_the_record() {
    let (_, mut cache) = cache_of("LRU", 16);
    let rec = page(11, 64);
    cache.put(Arc::clone(&rec)).unwrap();
    assert!(Arc::ptr_eq(&cache.find(11).unwrap(), &rec));
}

#[test]
fn put_then_remove_forgets_the_record() {
    for kind in ["LRU", "FIFO", "MRU", "Clock", "Random", "SOFT_MRU"] {
        let (_, mut cache) = cache_of(kind, 16);
        cache.put(page(11, 64)).unwrap();
        assert!(cache.remove(11), "{kind}");
        assert!(cache.find(11).is_none(), "{kind}");
        assert!(!cache.remove(11), "{kind}");
    }
}

#[test]
fn update_of_an_absent_position_inserts() {
    for kind in ["LRU", "FIFO", "MRU", "Clock", "Random"] {
        let (_, mut cache) = cache_of(kind, 16);
        let rec = page(3, 64);
        assert!(cache.update(3, Arc::clone(&rec)).unwrap().is_none(), "{kind}");
        assert!(cache.find(3).is_some(), "{kind}");
        let prior = cache.update(3, Arc::clone(&rec)).unwrap();
        assert!(Arc::ptr_eq(&prior.unwrap(), &rec), "{kind}");
    }
}

#[test]
fn unknown_selector_is_an_invalid_value() {
    let (_, writer) = recording_writer();
    match open_cache::<TestPage, _>(writer, "TQ", 16) {
        Err(CacheError::InvalidValue { param, value }) => {
            assert_eq!(param, "CACHE_TYPE");
            assert_eq!(value, "TQ");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn soft_cache_resurrects_evicted_records() {
    let (log, mut cache) = cache_of("SOFT_LRU", 16);
    let held: Vec<Arc<TestPage>> = (0..17).map(|pos| clean_page(pos, 1024)).collect();
    for rec in &held {
        cache.put(Arc::clone(rec)).unwrap();
    }
    // position 0 fell out of the primary, silently (clean)
    assert!(log.borrow().is_empty());
    let rec = cache.get(0).unwrap().expect("second-level hit");
    assert!(Arc::ptr_eq(&rec, &held[0]));
}

#[test]
fn soft_cache_misses_once_the_engine_lets_go() {
    let (_, mut cache) = cache_of("SOFT_LRU", 16);
    for pos in 0..17 {
        cache.put(clean_page(pos, 1024)).unwrap();
    }
    assert!(cache.get(0).unwrap().is_none());
}

#[test]
fn dirty_snapshot_is_ordered_by_the_list() {
    let (_, mut cache) = cache_of("FIFO", 64);
    for pos in 0..6 {
        if pos % 2 == 0 {
            cache.put(page(pos, 64)).unwrap();
        } else {
            cache.put(clean_page(pos, 64)).unwrap();
        }
    }
    let changed: Vec<u32> = cache.all_changed().iter().map(|r| r.pos()).collect();
    assert_eq!(changed, [0, 2, 4]);
}

#[test]
fn memory_tracks_records_and_overhead() {
    let (_, mut cache) = cache_of("LRU", 16);
    // 64 bucket slots of 8 words: 2 KiB of fixed overhead
    assert_eq!(cache.memory_kb(), 2);
    assert_eq!(cache.max_memory_kb(), 16);
    cache.put(page(0, 1024)).unwrap();
    assert_eq!(cache.memory_kb(), 6);
    cache.remove(0);
    assert_eq!(cache.memory_kb(), 2);
}
