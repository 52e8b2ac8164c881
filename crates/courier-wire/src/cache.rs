use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use courier_core::wire::RetryCache;

/// Insertion-order bounded map. Once the cap is reached the oldest key is
/// evicted on insert. Lives for the whole process so transport-internal
/// delivery retry counters survive reconnects.
pub struct BoundedCache {
    cap: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    map: HashMap<String, u32>,
    order: VecDeque<String>,
}

impl BoundedCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RetryCache for BoundedCache {
    fn get(&self, key: &str) -> Option<u32> {
        self.inner.lock().map.get(key).copied()
    }

    fn put(&self, key: &str, value: u32) {
        let mut inner = self.inner.lock();
        if inner.map.insert(key.to_owned(), value).is_none() {
            inner.order.push_back(key.to_owned());
            while inner.map.len() > self.cap {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.map.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let cache = BoundedCache::new(4);
        assert_eq!(cache.get("a"), None);
        cache.put("a", 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn overwrite_does_not_grow() {
        let cache = BoundedCache::new(4);
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_oldest_at_cap() {
        let cache = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }
}
