//! Per-table operation leases.
//!
//! A lease is a key written with atomic set-if-absent plus expiry. There is no
//! owner token: `release` simply deletes the key, so the TTL has to outlast
//! the slowest handler. Handlers stay idempotent underneath regardless.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheError, KeyValueStore};
use crate::ledger::TableId;

const LOG_TARGET: &str = "lock";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Start a round. Shuffling takes the same lease.
    StartGame,
    SettleRound,
    ResettleRound,
    CancelRound,
}

impl LockType {
    pub fn as_str(self) -> &'static str {
        match self {
            LockType::StartGame => "start_game",
            LockType::SettleRound => "settle_round",
            LockType::ResettleRound => "resettle_round",
            LockType::CancelRound => "cancel_round",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn lock_key(lock: LockType, table_id: TableId) -> String {
    format!("lock:{lock}:{table_id}")
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Non-blocking: returns `false` right away when the lease is held.
    pub async fn try_acquire(
        &self,
        lock: LockType,
        table_id: TableId,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let acquired = self
            .store
            .set_nx(&lock_key(lock, table_id), "1", ttl)
            .await?;
        if !acquired {
            tracing::debug!(target: LOG_TARGET, %lock, table_id, "lease busy");
        }
        Ok(acquired)
    }

    /// Safe to call after the lease expired or was re-taken.
    pub async fn release(&self, lock: LockType, table_id: TableId) {
        if let Err(err) = self.store.del(&lock_key(lock, table_id)).await {
            tracing::warn!(
                target: LOG_TARGET,
                %lock,
                table_id,
                error = %err,
                "failed to release lease; it will expire"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    #[tokio::test]
    async fn second_acquire_fails_until_release() -> anyhow::Result<()> {
        let locks = LockManager::new(Arc::new(MemoryStore::new()));
        let ttl = Duration::from_secs(5);
        assert!(locks.try_acquire(LockType::SettleRound, 1, ttl).await?);
        assert!(!locks.try_acquire(LockType::SettleRound, 1, ttl).await?);
        // Other tables and other operation types are independent.
        assert!(locks.try_acquire(LockType::SettleRound, 2, ttl).await?);
        assert!(locks.try_acquire(LockType::CancelRound, 1, ttl).await?);

        locks.release(LockType::SettleRound, 1).await;
        assert!(locks.try_acquire(LockType::SettleRound, 1, ttl).await?);
        Ok(())
    }

    #[tokio::test]
    async fn lease_expires_without_release() -> anyhow::Result<()> {
        let locks = LockManager::new(Arc::new(MemoryStore::new()));
        let ttl = Duration::from_millis(20);
        assert!(locks.try_acquire(LockType::StartGame, 1, ttl).await?);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(locks.try_acquire(LockType::StartGame, 1, ttl).await?);
        Ok(())
    }

    #[tokio::test]
    async fn release_of_a_free_lease_is_harmless() {
        let locks = LockManager::new(Arc::new(MemoryStore::new()));
        locks.release(LockType::CancelRound, 3).await;
    }
}
