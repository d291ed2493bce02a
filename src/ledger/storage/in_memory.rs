use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ledger::error::StorageError;
use crate::ledger::types::{
    BetOrder, NewRound, NewTable, NewTempOrder, NewUser, NewWalletTransaction, OrderId,
    OutboxEntry, RoundId, RoundRecord, RoundStatus, TableId, TableRecord, TempOrder, UserId,
    UserRecord, UserStats, WalletTransaction,
};

use super::{LedgerStorage, LedgerTxn};

#[derive(Clone)]
struct Inner {
    tables: BTreeMap<TableId, TableRecord>,
    rounds: BTreeMap<RoundId, RoundRecord>,
    temp_orders: BTreeMap<OrderId, TempOrder>,
    bet_orders: BTreeMap<OrderId, BetOrder>,
    users: BTreeMap<UserId, UserRecord>,
    transactions: BTreeMap<String, WalletTransaction>,
    stats: BTreeMap<UserId, UserStats>,
    outbox: BTreeMap<String, OutboxEntry>,
    next_table_id: TableId,
    next_round_id: RoundId,
    next_order_id: OrderId,
    next_user_id: UserId,
    next_transaction_id: i64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            rounds: BTreeMap::new(),
            temp_orders: BTreeMap::new(),
            bet_orders: BTreeMap::new(),
            users: BTreeMap::new(),
            transactions: BTreeMap::new(),
            stats: BTreeMap::new(),
            outbox: BTreeMap::new(),
            next_table_id: 1,
            next_round_id: 1,
            next_order_id: 1,
            next_user_id: 1,
            next_transaction_id: 1,
        }
    }
}

/// Ledger kept in process memory.
///
/// Transactions are serialized: `begin` waits for the previous transaction to
/// finish, works on a private copy and publishes it on commit.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStorage {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryLedgerStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InMemoryLedgerTxn {
    guard: OwnedMutexGuard<Inner>,
    working: Inner,
}

#[async_trait]
impl LedgerStorage for InMemoryLedgerStorage {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn + Send>, StorageError> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryLedgerTxn { guard, working }))
    }
}

fn next_id(counter: &mut i64) -> i64 {
    let id = *counter;
    *counter += 1;
    id
}

#[async_trait]
impl LedgerTxn for InMemoryLedgerTxn {
    async fn insert_table(&mut self, table: NewTable) -> Result<TableRecord, StorageError> {
        if self
            .working
            .tables
            .values()
            .any(|existing| existing.table_no == table.table_no)
        {
            return Err(StorageError::validation(format!(
                "table number {} already registered",
                table.table_no
            )));
        }
        let record = TableRecord {
            id: next_id(&mut self.working.next_table_id),
            lobby_no: table.lobby_no,
            table_no: table.table_no,
            game_type: table.game_type,
            countdown_secs: table.countdown_secs,
            current_shoe: table.current_shoe,
            maintain: false,
            dealer: table.dealer,
        };
        self.working.tables.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_table(&mut self, id: TableId) -> Result<Option<TableRecord>, StorageError> {
        Ok(self.working.tables.get(&id).cloned())
    }

    async fn update_table_shoe(&mut self, id: TableId, shoe_no: i64) -> Result<(), StorageError> {
        let table = self
            .working
            .tables
            .get_mut(&id)
            .ok_or(StorageError::NotFound("table"))?;
        table.current_shoe = shoe_no;
        Ok(())
    }

    async fn insert_round(&mut self, round: NewRound) -> Result<RoundRecord, StorageError> {
        let record = RoundRecord {
            id: next_id(&mut self.working.next_round_id),
            table_id: round.table_id,
            lobby_no: round.lobby_no,
            table_no: round.table_no,
            game_type: round.game_type,
            shoe_no: round.shoe_no,
            round_no: round.round_no,
            round_sn: round.round_sn,
            dealer: round.dealer,
            status: RoundStatus::Betting,
            result: None,
            details: None,
            start_time: round.start_time,
            end_time: round.end_time,
            settle_time: None,
            resettle_count: 0,
        };
        self.working.rounds.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_round(&mut self, id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        Ok(self.working.rounds.get(&id).cloned())
    }

    async fn latest_round(
        &mut self,
        table_id: TableId,
    ) -> Result<Option<RoundRecord>, StorageError> {
        Ok(self
            .working
            .rounds
            .values()
            .rev()
            .find(|round| round.table_id == table_id)
            .cloned())
    }

    async fn update_round(
        &mut self,
        round: &RoundRecord,
        expected: RoundStatus,
    ) -> Result<(), StorageError> {
        let stored = self
            .working
            .rounds
            .get_mut(&round.id)
            .ok_or(StorageError::NotFound("round"))?;
        if stored.status != expected {
            return Err(StorageError::Conflict("round"));
        }
        stored.status = round.status;
        stored.result = round.result.clone();
        stored.details = round.details.clone();
        stored.end_time = round.end_time;
        stored.settle_time = round.settle_time;
        stored.resettle_count = round.resettle_count;
        Ok(())
    }

    async fn insert_temp_order(&mut self, order: NewTempOrder) -> Result<TempOrder, StorageError> {
        if order.bets.is_empty() || order.bets.values().any(|amount| *amount <= Decimal::ZERO) {
            return Err(StorageError::validation(
                "temp order needs at least one positive wager leg",
            ));
        }
        let record = TempOrder {
            id: next_id(&mut self.working.next_order_id),
            round_id: order.round_id,
            table_id: order.table_id,
            user_id: order.user_id,
            bet_amount: order.bets.values().copied().sum(),
            bets: order.bets,
            currency: order.currency,
            bet_time: Utc::now(),
            source: order.source,
            ip: order.ip,
            user_type: order.user_type,
        };
        self.working.temp_orders.insert(record.id, record.clone());
        Ok(record)
    }

    async fn temp_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<TempOrder>, StorageError> {
        Ok(self
            .working
            .temp_orders
            .values()
            .filter(|order| order.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn delete_temp_order(&mut self, id: OrderId) -> Result<(), StorageError> {
        self.working.temp_orders.remove(&id);
        Ok(())
    }

    async fn insert_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError> {
        if self.working.bet_orders.contains_key(&order.id) {
            return Err(StorageError::validation(format!(
                "order {} already finalized",
                order.id
            )));
        }
        self.working.bet_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError> {
        let stored = self
            .working
            .bet_orders
            .get_mut(&order.id)
            .ok_or(StorageError::NotFound("bet order"))?;
        *stored = order.clone();
        Ok(())
    }

    async fn load_bet_order(&mut self, id: OrderId) -> Result<Option<BetOrder>, StorageError> {
        Ok(self.working.bet_orders.get(&id).cloned())
    }

    async fn bet_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<BetOrder>, StorageError> {
        Ok(self
            .working
            .bet_orders
            .values()
            .filter(|order| order.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<UserRecord, StorageError> {
        let record = UserRecord {
            id: next_id(&mut self.working.next_user_id),
            username: user.username,
            currency: user.currency,
            balance: user.balance,
            wallet_mode: user.wallet_mode,
            user_type: user.user_type,
            comm_rate: user.comm_rate,
        };
        self.working.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn adjust_balance(
        &mut self,
        id: UserId,
        delta: Decimal,
    ) -> Result<Decimal, StorageError> {
        let user = self
            .working
            .users
            .get_mut(&id)
            .ok_or(StorageError::NotFound("user"))?;
        user.balance += delta;
        Ok(user.balance)
    }

    async fn set_balance(&mut self, id: UserId, balance: Decimal) -> Result<(), StorageError> {
        let user = self
            .working
            .users
            .get_mut(&id)
            .ok_or(StorageError::NotFound("user"))?;
        user.balance = balance;
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<WalletTransaction>, StorageError> {
        Ok(self.working.transactions.get(idempotency_key).cloned())
    }

    async fn insert_transaction(
        &mut self,
        tx: NewWalletTransaction,
    ) -> Result<WalletTransaction, StorageError> {
        if self.working.transactions.contains_key(&tx.idempotency_key) {
            return Err(StorageError::validation(format!(
                "transaction {} already recorded",
                tx.idempotency_key
            )));
        }
        let record = WalletTransaction {
            id: next_id(&mut self.working.next_transaction_id),
            idempotency_key: tx.idempotency_key,
            user_id: tx.user_id,
            order_id: tx.order_id,
            round_id: tx.round_id,
            kind: tx.kind,
            amount: tx.amount,
            balance_after: tx.balance_after,
            txd: tx.txd,
            created_at: Utc::now(),
        };
        self.working
            .transactions
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(record)
    }

    async fn load_stats(&mut self, user_id: UserId) -> Result<Option<UserStats>, StorageError> {
        Ok(self.working.stats.get(&user_id).cloned())
    }

    async fn save_stats(&mut self, stats: &UserStats) -> Result<(), StorageError> {
        self.working.stats.insert(stats.user_id, stats.clone());
        Ok(())
    }

    async fn stage_job(
        &mut self,
        job_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), StorageError> {
        self.working
            .outbox
            .entry(job_key.to_string())
            .or_insert_with(|| OutboxEntry {
                job_key: job_key.to_string(),
                payload,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn staged_jobs(&mut self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError> {
        let mut staged: Vec<OutboxEntry> = self.working.outbox.values().cloned().collect();
        staged.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_key.cmp(&b.job_key))
        });
        staged.truncate(limit);
        Ok(staged)
    }

    async fn unstage_job(&mut self, job_key: &str) -> Result<(), StorageError> {
        self.working.outbox.remove(job_key);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameType;
    use crate::ledger::types::{UserType, WalletMode};
    use rust_decimal_macros::dec;

    fn new_user(balance: Decimal) -> NewUser {
        NewUser {
            username: "alice".into(),
            currency: "USD".into(),
            balance,
            wallet_mode: WalletMode::Internal,
            user_type: UserType::Player,
            comm_rate: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() -> anyhow::Result<()> {
        let storage = InMemoryLedgerStorage::new();

        let mut txn = storage.begin().await?;
        let user = txn.insert_user(new_user(dec!(100))).await?;
        txn.commit().await?;

        let mut txn = storage.begin().await?;
        txn.adjust_balance(user.id, dec!(50)).await?;
        txn.rollback().await;

        let mut txn = storage.begin().await?;
        let reloaded = txn.load_user(user.id).await?.expect("user");
        assert_eq!(reloaded.balance, dec!(100));
        txn.rollback().await;
        Ok(())
    }

    #[tokio::test]
    async fn temp_orders_sum_their_legs_and_reject_empty_wagers() -> anyhow::Result<()> {
        let storage = InMemoryLedgerStorage::new();
        let mut txn = storage.begin().await?;
        let table = txn
            .insert_table(NewTable {
                lobby_no: 1,
                table_no: "B01".into(),
                game_type: GameType::Baccarat,
                countdown_secs: 15,
                current_shoe: 1,
                dealer: None,
            })
            .await?;

        let order = NewTempOrder {
            round_id: 1,
            table_id: table.id,
            user_id: 1,
            bets: [(1, dec!(10)), (3, dec!(5))].into(),
            currency: "USD".into(),
            source: None,
            ip: None,
            user_type: UserType::Player,
        };
        let stored = txn.insert_temp_order(order.clone()).await?;
        assert_eq!(stored.bet_amount, dec!(15));

        let empty = NewTempOrder {
            bets: Default::default(),
            ..order
        };
        assert!(matches!(
            txn.insert_temp_order(empty).await,
            Err(StorageError::Validation(_))
        ));
        txn.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn round_updates_require_the_expected_status() -> anyhow::Result<()> {
        let storage = InMemoryLedgerStorage::new();
        let mut txn = storage.begin().await?;
        let now = Utc::now();
        let mut round = txn
            .insert_round(NewRound {
                table_id: 1,
                lobby_no: 1,
                table_no: "B01".into(),
                game_type: GameType::Baccarat,
                shoe_no: 20240101,
                round_no: 1,
                round_sn: "B01-20240101-001".into(),
                dealer: None,
                start_time: now,
                end_time: now,
            })
            .await?;
        round.status = RoundStatus::Over;
        txn.update_round(&round, RoundStatus::Betting).await?;
        txn.commit().await?;

        // A stale stop-betting that still believes the round is open.
        let mut txn = storage.begin().await?;
        let mut stale = round.clone();
        stale.status = RoundStatus::Dealing;
        assert!(matches!(
            txn.update_round(&stale, RoundStatus::Betting).await,
            Err(StorageError::Conflict("round"))
        ));
        txn.rollback().await;

        let mut txn = storage.begin().await?;
        let stored = txn.load_round(round.id).await?.expect("round");
        assert_eq!(stored.status, RoundStatus::Over);
        txn.rollback().await;
        Ok(())
    }

    #[tokio::test]
    async fn staged_jobs_keep_the_first_payload_until_unstaged() -> anyhow::Result<()> {
        let storage = InMemoryLedgerStorage::new();
        let mut txn = storage.begin().await?;
        txn.stage_job("settle:1:1", serde_json::json!({ "change": "9.5" }))
            .await?;
        txn.stage_job("settle:1:1", serde_json::json!({ "change": "0" }))
            .await?;
        txn.stage_job("settle:1:2", serde_json::json!({ "change": "-10" }))
            .await?;
        txn.commit().await?;

        let mut txn = storage.begin().await?;
        let staged = txn.staged_jobs(10).await?;
        assert_eq!(staged.len(), 2);
        let first = staged
            .iter()
            .find(|entry| entry.job_key == "settle:1:1")
            .expect("staged");
        assert_eq!(first.payload, serde_json::json!({ "change": "9.5" }));
        assert_eq!(txn.staged_jobs(1).await?.len(), 1);

        txn.unstage_job("settle:1:1").await?;
        txn.commit().await?;
        let mut txn = storage.begin().await?;
        let keys: Vec<String> = txn
            .staged_jobs(10)
            .await?
            .into_iter()
            .map(|entry| entry.job_key)
            .collect();
        assert_eq!(keys, vec!["settle:1:2"]);
        txn.rollback().await;
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_transaction_keys_are_rejected() -> anyhow::Result<()> {
        let storage = InMemoryLedgerStorage::new();
        let mut txn = storage.begin().await?;
        let tx = NewWalletTransaction {
            idempotency_key: "settle:1:1".into(),
            user_id: 1,
            order_id: 1,
            round_id: 1,
            kind: crate::ledger::types::SettlementKind::Settle,
            amount: dec!(19.5),
            balance_after: dec!(119.5),
            txd: None,
        };
        txn.insert_transaction(tx.clone()).await?;
        assert!(txn.insert_transaction(tx).await.is_err());
        assert!(txn.find_transaction("settle:1:1").await?.is_some());
        Ok(())
    }
}
