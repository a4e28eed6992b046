//! Injected key/value cache with per-entry TTL.
//!
//! The store reads through the cache for hot lookups (a user's preferences,
//! single sessions) and invalidates entries after every write that changes
//! them. Values are MessagePack encoded, so any backend that can hold bytes
//! can serve as a cache.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::Duration;

mod database;
mod memory;

pub use database::DatabaseCache;
pub use memory::MemoryCache;

/// Errors raised by cache backends.
///
/// Mirrors the split the store uses for its own persistence: backend failures,
/// values that cannot be encoded, and stored bytes that cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("failed to encode cache value: {0}")]
    Encode(String),
    #[error("failed to decode cache value: {0}")]
    Decode(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Byte-oriented cache with expiry.
///
/// Implementations must be safe to share between tasks. Expired entries must
/// never be returned by [`get`](Self::get), whether or not they have been
/// purged yet.
#[async_trait]
pub trait CacheStore: Debug + Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Inserts or replaces `key`, expiring `ttl` from now.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Drops every expired entry.
    async fn delete_expired(&self) -> CacheResult<()>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> CacheResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::Encode(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
}

pub(crate) fn preference_key(user_id: uuid::Uuid) -> String {
    format!("chat:preferences:{user_id}")
}

pub(crate) fn session_key(session_id: uuid::Uuid) -> String {
    format!("chat:session:{session_id}")
}
