//! The page-cache contract and the policy factory.
//!
//! Every replacement policy implements [`PageCache`]; the storage engine
//! selects one at run time through [`open_cache`] with the same string
//! selectors the database configuration exposes (`CACHE_TYPE`).

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::clock::ClockCache;
use crate::error::CacheError;
use crate::lru::LruCache;
use crate::mru::MruCache;
use crate::random::RandomCache;
use crate::record::{CacheWriter, PageRecord};
use crate::second_level::SecondLevelCache;

/// Common contract of the write-back page caches.
///
/// All implementations are single-threaded: the owning engine holds its own
/// lock across any call, including the `write_back` side effects an eviction
/// may trigger.
pub trait PageCache<R: PageRecord> {
    /// Looks up a record and records the access with the policy. Fallible
    /// because the second-level wrapper may promote (and therefore evict) on
    /// a get.
    fn get(&mut self, pos: u32) -> Result<Option<Arc<R>>, CacheError>;

    /// Looks up a record without touching the replacement order.
    fn find(&self, pos: u32) -> Option<Arc<R>>;

    /// Inserts a record with a position not currently cached. May trigger an
    /// eviction pass. Inserting a duplicate position is a programming error
    /// (panics under the `check` feature).
    fn put(&mut self, record: Arc<R>) -> Result<(), CacheError>;

    /// Re-registers a record: inserts it when the position is absent,
    /// otherwise records the access per policy and returns the resident
    /// record. A resident record that is not the given one is a programming
    /// error (panics under the `check` feature).
    fn update(&mut self, pos: u32, record: Arc<R>) -> Result<Option<Arc<R>>, CacheError>;

    /// Removes a record. Returns true when the position was cached.
    fn remove(&mut self, pos: u32) -> bool;

    /// Drops every record and resets the counters; the bucket count is kept.
    fn clear(&mut self);

    /// Moves the memory watermark, evicting when the cache is now over it.
    fn set_max_memory(&mut self, max_kb: u32) -> Result<(), CacheError>;

    /// The watermark, in KiB.
    fn max_memory_kb(&self) -> u32;

    /// The currently used memory, in KiB, including bucket-array overhead.
    fn memory_kb(&self) -> u32;

    /// Snapshot of the dirty records in list-traversal order.
    fn all_changed(&self) -> Vec<Arc<R>>;
}

/// Creates a cache of the given type and size.
///
/// Selectors: `"LRU"`, `"FIFO"`, `"MRU"`, `"Clock"`, `"Random"`. A `"SOFT_"`
/// prefix wraps the selected policy in the second-level cache, which gives
/// evicted records a second chance for as long as the engine still holds a
/// strong reference. Unknown selectors fail with
/// [`CacheError::InvalidValue`] naming `CACHE_TYPE`.
pub fn open_cache<R, W>(
    writer: W,
    cache_type: &str,
    max_kb: u32,
) -> Result<Box<dyn PageCache<R>>, CacheError>
where
    R: PageRecord + 'static,
    W: CacheWriter<R> + 'static,
{
    let (second_level, base_type) = match cache_type.strip_prefix("SOFT_") {
        Some(rest) => (true, rest),
        None => (false, cache_type),
    };
    let base: Box<dyn PageCache<R>> = match base_type {
        "LRU" => Box::new(LruCache::new(writer, max_kb)?),
        "FIFO" => Box::new(LruCache::fifo(writer, max_kb)?),
        "MRU" => Box::new(MruCache::new(writer, max_kb)?),
        "Clock" => Box::new(ClockCache::new(writer, max_kb)?),
        "Random" => Box::new(RandomCache::new(writer, max_kb)?),
        _ => return Err(CacheError::invalid_value("CACHE_TYPE", cache_type.to_string())),
    };
    Ok(if second_level {
        Box::new(SecondLevelCache::new(base))
    } else {
        base
    })
}

/// Shared fixtures for the policy unit tests: a configurable page record and
/// a writer that serializes its calls into a space-separated log, so a test
/// can assert an eviction pass's exact victims and flush grouping.
#[cfg(test)]
pub(crate) mod testutil {
    extern crate alloc;

    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::sync::Arc;
    use core::cell::RefCell;
    use core::fmt::Write as _;

    use crate::error::CacheError;
    use crate::record::{CacheWriter, PageRecord};

    pub(crate) struct Page {
        pub pos: u32,
        pub memory: u32,
        pub changed: bool,
        pub removable: bool,
        pub read: bool,
    }

    impl PageRecord for Page {
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

    /// A dirty, removable, read page — the default shape in the scenarios.
    pub(crate) fn page(pos: u32, memory: u32) -> Arc<Page> {
        Arc::new(Page {
            pos,
            memory,
            changed: true,
            removable: true,
            read: true,
        })
    }

    pub(crate) fn clean_page(pos: u32, memory: u32) -> Arc<Page> {
        Arc::new(Page {
            pos,
            memory,
            changed: false,
            removable: true,
            read: true,
        })
    }

    pub(crate) fn unread_page(pos: u32, memory: u32) -> Arc<Page> {
        Arc::new(Page {
            pos,
            memory,
            changed: true,
            removable: true,
            read: false,
        })
    }

    pub(crate) struct RecordingWriter {
        log: Rc<RefCell<String>>,
    }

    impl CacheWriter<Page> for RecordingWriter {
        fn flush_log(&mut self) -> Result<(), CacheError> {
            self.log.borrow_mut().push_str("flush ");
            Ok(())
        }

        fn write_back(&mut self, record: &Page) -> Result<(), CacheError> {
            write!(self.log.borrow_mut(), "{} ", record.pos()).expect("writing to a string");
            Ok(())
        }
    }

    pub(crate) fn writer() -> (Rc<RefCell<String>>, RecordingWriter) {
        let log = Rc::new(RefCell::new(String::new()));
        (Rc::clone(&log), RecordingWriter { log: Rc::clone(&log) })
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{page, writer};
    use super::*;

    #[test]
    fn factory_accepts_every_selector() {
        for name in ["LRU", "FIFO", "MRU", "Clock", "Random", "SOFT_LRU", "SOFT_Clock"] {
            let (_, w) = writer();
            let mut cache = open_cache(w, name, 16).unwrap();
            cache.put(page(1, 128)).unwrap();
            assert!(cache.find(1).is_some(), "selector {name}");
        }
    }

    #[test]
    fn factory_rejects_unknown_selectors() {
        let (_, w) = writer();
        match open_cache::<super::testutil::Page, _>(w, "TQ", 16) {
            Err(CacheError::InvalidValue { param, value }) => {
                assert_eq!(param, "CACHE_TYPE");
                assert_eq!(value, "TQ");
            }
            Err(other) => panic!("expected an invalid-value error, got {other}"),
            Ok(_) => panic!("expected an invalid-value error"),
        }
    }
}
