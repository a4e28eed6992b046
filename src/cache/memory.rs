use std::collections::HashMap;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use super::{CacheResult, CacheStore};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    expires_at: OffsetDateTime,
}

/// In-process cache. The default for [`MetadataStore`](crate::MetadataStore).
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = OffsetDateTime::now_utc();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let entry = Entry {
            data: value,
            expires_at: OffsetDateTime::now_utc() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_expired(&self) -> CacheResult<()> {
        let now = OffsetDateTime::now_utc();
        self.entries.write().await.retain(|_, entry| entry.expires_at > now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::minutes(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_then_purged() {
        let cache = MemoryCache::new();
        cache.set("old", b"x".to_vec(), Duration::seconds(-1)).await.unwrap();
        cache.set("new", b"y".to_vec(), Duration::minutes(1)).await.unwrap();

        assert_eq!(cache.get("old").await.unwrap(), None);
        assert_eq!(cache.len().await, 2);

        cache.delete_expired().await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("new").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn typed_helpers_round_trip_through_bytes() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Payload {
            name: String,
            count: i64,
        }

        let cache = MemoryCache::new();
        let value = Payload {
            name: "x".to_string(),
            count: 3,
        };
        cache
            .set("p", super::super::encode(&value).unwrap(), Duration::minutes(1))
            .await
            .unwrap();
        let bytes = cache.get("p").await.unwrap().unwrap();
        let back: Payload = super::super::decode(&bytes).unwrap();
        assert_eq!(back, value);
        assert!(super::super::decode::<Payload>(b"\xff\x00").is_err());
    }
}
