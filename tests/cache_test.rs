mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chat_metadata_store::cache::CacheResult;
use chat_metadata_store::{CacheError, CacheStore, DatabaseCache, MetadataStore, NewSession, SessionUpdate};
use time::Duration;

use common::{create_test_user, test_connection};

/// A cache whose backend is down.
#[derive(Debug, Default)]
struct BrokenCache {
    calls: AtomicUsize,
}

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn delete_expired(&self) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn database_cache_expires_entries() -> Result<()> {
    let cache = DatabaseCache::new(test_connection().await?);

    cache.set("k", b"value".to_vec(), Duration::minutes(5)).await?;
    assert_eq!(cache.get("k").await?, Some(b"value".to_vec()));

    cache.set("k", b"newer".to_vec(), Duration::minutes(5)).await?;
    assert_eq!(cache.get("k").await?, Some(b"newer".to_vec()));

    cache.set("old", b"stale".to_vec(), Duration::seconds(-1)).await?;
    assert_eq!(cache.get("old").await?, None);
    cache.delete_expired().await?;

    cache.delete("k").await?;
    assert_eq!(cache.get("k").await?, None);
    Ok(())
}

#[tokio::test]
async fn database_cache_serves_the_store() -> Result<()> {
    let conn = test_connection().await?;
    let store = MetadataStore::new(conn.clone()).with_cache(Arc::new(DatabaseCache::new(conn)));
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    let cached = store.get_session(user_id, session.id).await?;
    assert_eq!(cached, store.get_session(user_id, session.id).await?);

    store
        .update_session(
            user_id,
            session.id,
            SessionUpdate {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(store.get_session(user_id, session.id).await?.title, "Renamed");

    let prefs = store.get_or_create_preferences(user_id).await?;
    assert_eq!(prefs, store.get_or_create_preferences(user_id).await?);
    store.purge_expired_cache().await?;
    Ok(())
}

#[tokio::test]
async fn failing_cache_never_fails_requests() -> Result<()> {
    let cache = Arc::new(BrokenCache::default());
    let store = MetadataStore::new(test_connection().await?).with_cache(cache.clone());
    let user_id = create_test_user(&store).await?;

    let prefs = store.get_or_create_preferences(user_id).await?;
    assert_eq!(prefs.default_model, "gpt-4o-mini");

    let session = store.create_session(user_id, NewSession::default()).await?;
    assert_eq!(store.get_session(user_id, session.id).await?.id, session.id);
    store.archive_session(user_id, session.id).await?;

    assert!(cache.calls.load(Ordering::SeqCst) > 0);
    assert!(store.purge_expired_cache().await.is_err());
    Ok(())
}

#[tokio::test]
async fn short_ttl_entries_fall_back_to_database() -> Result<()> {
    let store = MetadataStore::new(test_connection().await?).with_cache_ttl(Duration::seconds(-1));
    let user_id = create_test_user(&store).await?;

    let first = store.get_or_create_preferences(user_id).await?;
    let second = store.get_or_create_preferences(user_id).await?;
    assert_eq!(first.user_id, second.user_id);
    assert!(store.cache().get(&format!("chat:preferences:{user_id}")).await?.is_none());
    Ok(())
}
