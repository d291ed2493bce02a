use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Cmd, FromRedisValue};
use tokio::sync::Mutex;

use super::{CacheError, KeyValueStore};

const LOG_TARGET: &str = "cache::redis";

/// HSET guarded by HEXISTS, atomic on the server.
const HSET_XX: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
";

/// Redis-backed store. Every key is namespaced with `prefix`.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    prefix: String,
}

impl RedisStore {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        match guard.as_ref() {
            Some(conn) => Ok(conn.clone()),
            None => Err(CacheError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "redis connection unavailable",
            )))),
        }
    }

    async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, CacheError> {
        let mut conn = self.connection().await?;
        match cmd.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() {
                    tracing::warn!(target: LOG_TARGET, error = %err, "dropping redis connection");
                    *self.connection.lock().await = None;
                }
                Err(err.into())
            }
        }
    }

    /// Publish a raw message on an unprefixed pub/sub channel.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<usize, CacheError> {
        self.run(redis::cmd("PUBLISH").arg(channel).arg(message))
            .await
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run(redis::cmd("GET").arg(self.key(key))).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        self.run::<()>(&cmd).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(self.key(key))
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis().max(1) as u64),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let removed: i64 = self.run(redis::cmd("DEL").arg(self.key(key))).await?;
        Ok(removed > 0)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        self.run(redis::cmd("RPUSH").arg(self.key(key)).arg(value))
            .await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run(redis::cmd("LPOP").arg(self.key(key))).await
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.run(redis::cmd("LRANGE").arg(self.key(key)).arg(start).arg(stop))
            .await
    }

    async fn lset(&self, key: &str, index: isize, value: &str) -> Result<(), CacheError> {
        self.run::<()>(redis::cmd("LSET").arg(self.key(key)).arg(index).arg(value))
            .await
            .map_err(|err| match err {
                CacheError::Redis(inner) if inner.kind() == redis::ErrorKind::ResponseError => {
                    CacheError::IndexOutOfRange {
                        key: key.to_string(),
                        index,
                    }
                }
                other => other,
            })
    }

    async fn llen(&self, key: &str) -> Result<usize, CacheError> {
        self.run(redis::cmd("LLEN").arg(self.key(key))).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.run::<i64>(redis::cmd("HSET").arg(self.key(key)).arg(field).arg(value))
            .await
            .map(|_| ())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.run(redis::cmd("HSETNX").arg(self.key(key)).arg(field).arg(value))
            .await
    }

    async fn hset_xx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        let written: i64 = self
            .run(
                redis::cmd("EVAL")
                    .arg(HSET_XX)
                    .arg(1)
                    .arg(self.key(key))
                    .arg(field)
                    .arg(value),
            )
            .await?;
        Ok(written == 1)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.run(redis::cmd("HGET").arg(self.key(key)).arg(field))
            .await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        let removed: i64 = self
            .run(redis::cmd("HDEL").arg(self.key(key)).arg(field))
            .await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError> {
        let map: HashMap<String, String> =
            self.run(redis::cmd("HGETALL").arg(self.key(key))).await?;
        let mut pairs: Vec<(String, String)> = map.into_iter().collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.run(redis::cmd("HINCRBY").arg(self.key(key)).arg(field).arg(delta))
            .await
    }
}
