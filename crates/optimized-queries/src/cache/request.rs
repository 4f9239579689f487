//! In-process request cache
//!
//! A concurrent map of raw row sets guarded by a generation counter. A
//! reader records the generation before executing; its write is accepted
//! only if no clear happened in between, so a result computed against
//! pre-invalidation data is never published after the clear.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::value::ResultRow;

#[derive(Debug)]
struct Entry {
    generation: u64,
    rows: Arc<Vec<ResultRow>>,
}

#[derive(Debug, Default)]
pub struct RequestCache {
    entries: DashMap<String, Entry>,
    generation: AtomicU64,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation; pass it back to [`RequestCache::put`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<ResultRow>>> {
        let current = self.generation();
        self.entries
            .get(key)
            .filter(|entry| entry.generation == current)
            .map(|entry| Arc::clone(&entry.rows))
    }

    /// Store rows computed during `observed` generation.
    ///
    /// Returns false (and stores nothing) if the cache was cleared since.
    pub fn put(&self, key: &str, rows: Vec<ResultRow>, observed: u64) -> bool {
        if self.generation() != observed {
            return false;
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                generation: observed,
                rows: Arc::new(rows),
            },
        );
        // A clear may have raced the insert
        if self.generation() != observed {
            self.entries.remove_if(key, |_, entry| entry.generation == observed);
            return false;
        }
        true
    }

    pub fn forget(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry and start a new generation
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<ResultRow> {
        vec![ResultRow::from_iter([("id".to_string(), json!(1))])]
    }

    #[test]
    fn test_put_and_get() {
        let cache = RequestCache::new();
        let generation = cache.generation();
        assert!(cache.put("k", rows(), generation));
        assert_eq!(cache.get("k").unwrap().len(), 1);
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_stale_write_after_clear_is_dropped() {
        let cache = RequestCache::new();
        let observed = cache.generation();
        cache.clear();

        assert!(!cache.put("k", rows(), observed));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_hides_existing_entries() {
        let cache = RequestCache::new();
        cache.put("k", rows(), cache.generation());
        cache.clear();
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_concurrent_clears_never_expose_stale_rows() {
        let cache = Arc::new(RequestCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let observed = cache.generation();
                        let key = format!("k{}", n % 4);
                        if i % 2 == 0 {
                            cache.put(&key, rows(), observed);
                        } else {
                            cache.clear();
                        }
                        if let Some(found) = cache.get(&key) {
                            assert_eq!(found.len(), 1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
