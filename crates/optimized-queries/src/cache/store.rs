//! External cache tier

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CacheResult;

/// Tag-aware key/value store consulted after the request cache misses
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, registering it under every tag
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>, tags: &[String]) -> CacheResult<()>;

    async fn forget(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key registered under any of `tags`; returns the number removed
    async fn flush_tags(&self, tags: &[String]) -> CacheResult<usize>;

    async fn flush(&self) -> CacheResult<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |exp| Instant::now() > exp)
    }
}

/// In-memory [`CacheStore`] with TTL expiry and a tag index
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    tags: DashMap<String, HashSet<String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently registered under `tag`
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop expired entries and tag index keys whose entry is gone
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        self.tags.retain(|_, keys| {
            keys.retain(|key| self.entries.contains_key(key));
            !keys.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>, tags: &[String]) -> CacheResult<()> {
        self.purge_expired();
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        for tag in tags {
            self.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
        Ok(())
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        for mut keys in self.tags.iter_mut() {
            keys.remove(key);
        }
        Ok(self.entries.remove(key).is_some())
    }

    async fn flush_tags(&self, tags: &[String]) -> CacheResult<usize> {
        let mut removed = 0;
        for tag in tags {
            if let Some((_, keys)) = self.tags.remove(tag) {
                for key in keys {
                    if self.entries.remove(&key).is_some() {
                        removed += 1;
                    }
                }
            }
        }
        self.purge_expired();
        Ok(removed)
    }

    async fn flush(&self) -> CacheResult<()> {
        self.entries.clear();
        self.tags.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_forget() {
        let store = MemoryCacheStore::new();
        store.put("a", b"rows".to_vec(), None, &[]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"rows".to_vec()));
        assert!(store.forget("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let store = MemoryCacheStore::new();
        store
            .put("a", b"rows".to_vec(), Some(Duration::from_millis(10)), &[])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_flush_tags_is_selective() {
        let store = MemoryCacheStore::new();
        let articles = vec!["articles".to_string()];
        let users = vec!["users".to_string()];
        store.put("a1", vec![1], None, &articles).await.unwrap();
        store.put("a2", vec![2], None, &articles).await.unwrap();
        store.put("u1", vec![3], None, &users).await.unwrap();

        assert_eq!(store.flush_tags(&articles).await.unwrap(), 2);
        assert_eq!(store.get("a1").await.unwrap(), None);
        assert_eq!(store.get("u1").await.unwrap(), Some(vec![3]));
        assert!(store.keys_for_tag("articles").is_empty());
    }

    #[tokio::test]
    async fn test_writes_purge_expired_entries_and_tag_keys() {
        let store = MemoryCacheStore::new();
        let articles = vec!["articles".to_string()];
        store
            .put("stale", vec![1], Some(Duration::from_millis(10)), &articles)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.put("fresh", vec![2], None, &[]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.keys_for_tag("articles").is_empty());
    }
}
