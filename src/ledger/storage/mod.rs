use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::ledger::error::StorageError;
use crate::ledger::types::{
    BetOrder, NewRound, NewTable, NewTempOrder, NewUser, NewWalletTransaction, OrderId,
    OutboxEntry, RoundId, RoundRecord, RoundStatus, TableId, TableRecord, TempOrder, UserId,
    UserRecord, UserStats, WalletTransaction,
};

/// Durable store of tables, rounds, orders and wallets.
///
/// All reads and writes happen inside a transaction obtained from
/// [`LedgerStorage::begin`]; nothing is visible to other transactions until
/// [`LedgerTxn::commit`].
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn + Send>, StorageError>;
}

#[async_trait]
pub trait LedgerTxn: Send {
    async fn insert_table(&mut self, table: NewTable) -> Result<TableRecord, StorageError>;

    async fn load_table(&mut self, id: TableId) -> Result<Option<TableRecord>, StorageError>;

    async fn update_table_shoe(&mut self, id: TableId, shoe_no: i64) -> Result<(), StorageError>;

    async fn insert_round(&mut self, round: NewRound) -> Result<RoundRecord, StorageError>;

    /// Load a round and hold its row until the transaction ends.
    async fn load_round(&mut self, id: RoundId) -> Result<Option<RoundRecord>, StorageError>;

    /// Most recently created round of a table.
    async fn latest_round(&mut self, table_id: TableId)
        -> Result<Option<RoundRecord>, StorageError>;

    /// Overwrite the mutable columns: status, result, details, timing and
    /// resettle count. Fails with [`StorageError::Conflict`] unless the stored
    /// status is still `expected`.
    async fn update_round(
        &mut self,
        round: &RoundRecord,
        expected: RoundStatus,
    ) -> Result<(), StorageError>;

    async fn insert_temp_order(&mut self, order: NewTempOrder) -> Result<TempOrder, StorageError>;

    async fn temp_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<TempOrder>, StorageError>;

    async fn delete_temp_order(&mut self, id: OrderId) -> Result<(), StorageError>;

    async fn insert_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError>;

    async fn update_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError>;

    async fn load_bet_order(&mut self, id: OrderId) -> Result<Option<BetOrder>, StorageError>;

    async fn bet_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<BetOrder>, StorageError>;

    async fn insert_user(&mut self, user: NewUser) -> Result<UserRecord, StorageError>;

    async fn load_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StorageError>;

    /// Atomic `balance += delta`; returns the new balance.
    async fn adjust_balance(&mut self, id: UserId, delta: Decimal)
        -> Result<Decimal, StorageError>;

    /// Mirror a balance reported by an upstream wallet.
    async fn set_balance(&mut self, id: UserId, balance: Decimal) -> Result<(), StorageError>;

    async fn find_transaction(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<WalletTransaction>, StorageError>;

    async fn insert_transaction(
        &mut self,
        tx: NewWalletTransaction,
    ) -> Result<WalletTransaction, StorageError>;

    async fn load_stats(&mut self, user_id: UserId) -> Result<Option<UserStats>, StorageError>;

    async fn save_stats(&mut self, stats: &UserStats) -> Result<(), StorageError>;

    /// Stage a settlement job. A key staged twice keeps the first payload.
    async fn stage_job(&mut self, job_key: &str, payload: serde_json::Value)
        -> Result<(), StorageError>;

    /// Oldest staged jobs first.
    async fn staged_jobs(&mut self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError>;

    async fn unstage_job(&mut self, job_key: &str) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
    async fn rollback(self: Box<Self>);
}

pub mod in_memory;
pub mod sea_orm;

pub use in_memory::InMemoryLedgerStorage;
pub use sea_orm::SeaOrmLedgerStorage;
