use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{CacheError, KeyValueStore};

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// In-process store with per-key expiry. Operations on one key are atomic.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> MapEntry<'_, String, Entry> {
        let mut slot = self.entries.entry(key.to_string());
        if let MapEntry::Occupied(occupied) = slot {
            if occupied.get().is_expired() {
                occupied.remove();
                slot = self.entries.entry(key.to_string());
            } else {
                slot = MapEntry::Occupied(occupied);
            }
        }
        slot
    }

    fn with_list<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut VecDeque<String>) -> Result<R, CacheError>,
        missing: impl FnOnce() -> R,
    ) -> Result<R, CacheError> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::List(list) => f(list),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
            MapEntry::Vacant(vacant) if create => {
                let mut list = VecDeque::new();
                let out = f(&mut list)?;
                vacant.insert(Entry::new(Value::List(list), None));
                Ok(out)
            }
            MapEntry::Vacant(_) => Ok(missing()),
        }
    }

    fn with_hash<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, String>) -> Result<R, CacheError>,
        missing: impl FnOnce() -> R,
    ) -> Result<R, CacheError> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::Hash(hash) => f(hash),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
            MapEntry::Vacant(vacant) if create => {
                let mut hash = HashMap::new();
                let out = f(&mut hash)?;
                vacant.insert(Entry::new(Value::Hash(hash), None));
                Ok(out)
            }
            MapEntry::Vacant(_) => Ok(missing()),
        }
    }
}

/// Resolve a possibly negative list index.
fn resolve_index(len: usize, index: isize) -> Option<usize> {
    let len = len as isize;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.live_entry(key) {
            MapEntry::Occupied(occupied) => match &occupied.get().value {
                Value::Str(value) => Ok(Some(value.clone())),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
            MapEntry::Vacant(_) => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        match self.live_entry(key) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Str(value.to_string()), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        self.with_list(
            key,
            true,
            |list| {
                list.push_back(value.to_string());
                Ok(list.len())
            },
            || 0,
        )
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_list(key, false, |list| Ok(list.pop_front()), || None)
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.with_list(
            key,
            false,
            |list| {
                let len = list.len() as isize;
                let start = if start < 0 { (len + start).max(0) } else { start };
                let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                if start > stop || start >= len {
                    return Ok(Vec::new());
                }
                Ok(list
                    .range(start as usize..=stop as usize)
                    .cloned()
                    .collect())
            },
            Vec::new,
        )
    }

    async fn lset(&self, key: &str, index: isize, value: &str) -> Result<(), CacheError> {
        let out_of_range = || CacheError::IndexOutOfRange {
            key: key.to_string(),
            index,
        };
        self.with_list(
            key,
            false,
            |list| {
                let idx = resolve_index(list.len(), index).ok_or_else(out_of_range)?;
                list[idx] = value.to_string();
                Ok(())
            },
            || (),
        )?;
        if self.entries.contains_key(key) {
            Ok(())
        } else {
            Err(out_of_range())
        }
    }

    async fn llen(&self, key: &str) -> Result<usize, CacheError> {
        self.with_list(key, false, |list| Ok(list.len()), || 0)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.with_hash(
            key,
            true,
            |hash| {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            },
            || (),
        )
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.with_hash(
            key,
            true,
            |hash| {
                if hash.contains_key(field) {
                    return Ok(false);
                }
                hash.insert(field.to_string(), value.to_string());
                Ok(true)
            },
            || false,
        )
    }

    async fn hset_xx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.with_hash(
            key,
            false,
            |hash| match hash.get_mut(field) {
                Some(slot) => {
                    *slot = value.to_string();
                    Ok(true)
                }
                None => Ok(false),
            },
            || false,
        )
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.with_hash(key, false, |hash| Ok(hash.get(field).cloned()), || None)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        self.with_hash(key, false, |hash| Ok(hash.remove(field).is_some()), || false)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError> {
        self.with_hash(
            key,
            false,
            |hash| {
                let mut pairs: Vec<(String, String)> = hash
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                pairs.sort();
                Ok(pairs)
            },
            Vec::new,
        )
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.with_hash(
            key,
            true,
            |hash| {
                let current = match hash.get(field) {
                    Some(raw) => raw
                        .parse::<i64>()
                        .map_err(|_| CacheError::WrongType(format!("{key}.{field}")))?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                Ok(next)
            },
            || 0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_respects_live_keys_and_expiry() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(store.set_nx("lock", "1", Duration::from_millis(20)).await?);
        assert!(!store.set_nx("lock", "1", Duration::from_millis(20)).await?);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_nx("lock", "1", Duration::from_millis(20)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_operations_follow_redis_semantics() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        for value in ["a", "b", "c"] {
            store.rpush("list", value).await?;
        }
        assert_eq!(store.lrange("list", 0, -1).await?, vec!["a", "b", "c"]);
        assert_eq!(store.lrange("list", -2, -1).await?, vec!["b", "c"]);
        assert_eq!(store.lrange("list", 1, 10).await?, vec!["b", "c"]);

        store.lset("list", -1, "z").await?;
        assert_eq!(store.lpop("list").await?, Some("a".to_string()));
        assert_eq!(store.lrange("list", 0, -1).await?, vec!["b", "z"]);
        assert_eq!(store.llen("list").await?, 2);

        assert!(store.lset("list", 5, "x").await.is_err());
        assert!(store.lset("missing", 0, "x").await.is_err());
        assert!(store.lrange("missing", 0, -1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn hash_operations_and_type_errors() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(store.hset_nx("h", "a", "1").await?);
        assert!(!store.hset_nx("h", "a", "2").await?);
        assert_eq!(store.hget("h", "a").await?, Some("1".to_string()));
        assert_eq!(store.hincr("h", "n", 3).await?, 3);
        assert_eq!(store.hincr("h", "n", -1).await?, 2);
        assert_eq!(store.hgetall("h").await?.len(), 2);
        assert!(store.hset_xx("h", "n", "7").await?);
        assert_eq!(store.hget("h", "n").await?, Some("7".to_string()));
        assert!(store.hdel("h", "a").await?);
        assert!(!store.hset_xx("h", "a", "3").await?);
        assert_eq!(store.hget("h", "a").await?, None);
        assert!(!store.hset_xx("missing", "a", "3").await?);

        store.set("s", "x", None).await?;
        assert!(matches!(
            store.rpush("s", "y").await,
            Err(CacheError::WrongType(_))
        ));
        Ok(())
    }
}
