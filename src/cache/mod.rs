//! Key-value cache contract shared by the table-state projection, the round
//! history, the lock manager and the persistent job queue.
//!
//! Any backend offering strings, lists and hashes with per-key expiry fits.
//! [`MemoryStore`] serves tests and single-process deployments, [`RedisStore`]
//! serves horizontally scaled ones.

pub mod history;
pub mod memory;
pub mod redis;
pub mod table_state;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use history::{HistoryEntry, RoundHistoryCache, RouletteStats};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use table_state::TableStateCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("corrupt cached value under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("key {0} holds a value of another type")]
    WrongType(String),
    #[error("index {index} out of range for list {key}")]
    IndexOutOfRange { key: String, index: isize },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Atomic set-if-absent with expiry. Returns whether the key was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError>;

    async fn lpop(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Inclusive range with negative indices counting from the tail.
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;

    async fn lset(&self, key: &str, index: isize, value: &str) -> Result<(), CacheError>;

    async fn llen(&self, key: &str) -> Result<usize, CacheError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Set a hash field only if it is absent. Returns whether it was written.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError>;

    /// Overwrite a hash field only if it is present. Returns whether it was
    /// written.
    async fn hset_xx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError>;

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(raw) => decode(key, &raw).map(Some),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// Parse a cached JSON value, reporting the key on failure.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Corrupt {
        key: key.to_string(),
        source,
    })
}
