use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use courier_core::auth::KeyStore;
use courier_core::errors::AuthError;

/// Read-through cache over the raw key store. Key lookups during session
/// setup are hot; the backing store may be files or a database, so hits are
/// served from memory and writes go through before the cache is touched.
pub struct CachedKeyStore {
    inner: Arc<dyn KeyStore>,
    cache: DashMap<String, Value>,
}

fn cache_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

impl CachedKeyStore {
    pub fn new(inner: Arc<dyn KeyStore>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl KeyStore for CachedKeyStore {
    async fn get(
        &self,
        kind: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, AuthError> {
        let mut found = HashMap::new();
        let mut misses = Vec::new();

        for id in ids {
            match self.cache.get(&cache_key(kind, id)) {
                Some(entry) => {
                    found.insert(id.clone(), entry.value().clone());
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            let fetched = self.inner.get(kind, &misses).await?;
            for (id, value) in fetched {
                self.cache.insert(cache_key(kind, &id), value.clone());
                found.insert(id, value);
            }
        }

        Ok(found)
    }

    async fn set(
        &self,
        entries: HashMap<String, HashMap<String, Option<Value>>>,
    ) -> Result<(), AuthError> {
        // Write-through: the backing store is the source of truth.
        self.inner.set(entries.clone()).await?;

        for (kind, ids) in entries {
            for (id, value) in ids {
                let key = cache_key(&kind, &id);
                match value {
                    Some(value) => {
                        self.cache.insert(key, value);
                    }
                    None => {
                        self.cache.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backing store that counts get() round-trips.
    struct CountingStore {
        data: DashMap<String, Value>,
        gets: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                data: DashMap::new(),
                gets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyStore for CountingStore {
        async fn get(
            &self,
            kind: &str,
            ids: &[String],
        ) -> Result<HashMap<String, Value>, AuthError> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            let mut out = HashMap::new();
            for id in ids {
                if let Some(v) = self.data.get(&cache_key(kind, id)) {
                    out.insert(id.clone(), v.clone());
                }
            }
            Ok(out)
        }

        async fn set(
            &self,
            entries: HashMap<String, HashMap<String, Option<Value>>>,
        ) -> Result<(), AuthError> {
            for (kind, ids) in entries {
                for (id, value) in ids {
                    match value {
                        Some(v) => {
                            self.data.insert(cache_key(&kind, &id), v);
                        }
                        None => {
                            self.data.remove(&cache_key(&kind, &id));
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn set_entries(kind: &str, id: &str, value: Option<Value>) -> HashMap<String, HashMap<String, Option<Value>>> {
        let mut ids = HashMap::new();
        ids.insert(id.to_string(), value);
        let mut entries = HashMap::new();
        entries.insert(kind.to_string(), ids);
        entries
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let backing = Arc::new(CountingStore::new());
        backing
            .set(set_entries("pre-key", "1", Some(Value::from("material"))))
            .await
            .unwrap();

        let cached = CachedKeyStore::new(backing.clone());
        let ids = vec!["1".to_string()];

        let first = cached.get("pre-key", &ids).await.unwrap();
        assert_eq!(first.get("1"), Some(&Value::from("material")));
        assert_eq!(backing.gets.load(Ordering::Relaxed), 1);

        let second = cached.get("pre-key", &ids).await.unwrap();
        assert_eq!(second.get("1"), Some(&Value::from("material")));
        assert_eq!(backing.gets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn delete_invalidates_cache() {
        let backing = Arc::new(CountingStore::new());
        let cached = CachedKeyStore::new(backing.clone());

        cached
            .set(set_entries("session", "7", Some(Value::from("s"))))
            .await
            .unwrap();
        let hit = cached.get("session", &["7".to_string()]).await.unwrap();
        assert_eq!(hit.len(), 1);

        cached
            .set(set_entries("session", "7", None))
            .await
            .unwrap();
        let miss = cached.get("session", &["7".to_string()]).await.unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn misses_fall_through_per_id() {
        let backing = Arc::new(CountingStore::new());
        backing
            .set(set_entries("pre-key", "a", Some(Value::from(1))))
            .await
            .unwrap();
        backing
            .set(set_entries("pre-key", "b", Some(Value::from(2))))
            .await
            .unwrap();

        let cached = CachedKeyStore::new(backing.clone());
        let _ = cached.get("pre-key", &["a".to_string()]).await.unwrap();

        // "a" is now cached; only "b" should hit the backing store.
        let both = cached
            .get("pre-key", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(backing.gets.load(Ordering::Relaxed), 2);
    }
}
