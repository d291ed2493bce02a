//! Recording fakes and a fully wired in-memory engine for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::broadcast::BroadcastGateway;
use crate::cache::{CacheError, KeyValueStore, MemoryStore};
use crate::config::EngineConfig;
use crate::game::{BetCode, GameType};
use crate::jobs::{
    JobQueue, JobWorker, PassReport, RelayReport, RoundTimerHandler, SettlementProcessor,
    WorkerConfig, ROUND_TIMER_QUEUE, SETTLEMENT_QUEUE,
};
use crate::ledger::{
    BetOrder, InMemoryLedgerStorage, LedgerStorage, NewTable, NewTempOrder, NewUser, OrderId,
    RoundId, RoundRecord, TableRecord, TempOrder, UserId, UserRecord, UserStats, UserType,
    WalletMode,
};
use crate::round::RoundController;
use crate::tokio_tools::now_millis;
use crate::wallet::{WalletApi, WalletApiError, WalletRequest, WalletResponse};

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub user_id: Option<UserId>,
    pub event: String,
    pub payload: Value,
}

#[derive(Default)]
pub struct RecordingBroadcast {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingBroadcast {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event == event).count()
    }
}

#[async_trait]
impl BroadcastGateway for RecordingBroadcast {
    async fn global_broadcast(&self, event: &str, payload: Value) {
        self.events.lock().push(RecordedEvent {
            user_id: None,
            event: event.to_string(),
            payload,
        });
    }

    async fn push_to_user(&self, user_id: UserId, event: &str, payload: Value) {
        self.events.lock().push(RecordedEvent {
            user_id: Some(user_id),
            event: event.to_string(),
            payload,
        });
    }
}

/// Upstream wallet double: keeps balances per username and replays scripted
/// failures before succeeding.
#[derive(Default)]
pub struct ScriptedWalletApi {
    balances: Mutex<HashMap<String, Decimal>>,
    failures: Mutex<VecDeque<WalletApiError>>,
    calls: Mutex<Vec<(String, WalletRequest)>>,
}

impl ScriptedWalletApi {
    pub fn set_balance(&self, username: &str, balance: Decimal) {
        self.balances.lock().insert(username.to_string(), balance);
    }

    pub fn fail_next(&self, err: WalletApiError) {
        self.failures.lock().push_back(err);
    }

    pub fn calls(&self) -> Vec<(String, WalletRequest)> {
        self.calls.lock().clone()
    }

    fn apply(&self, op: &str, request: &WalletRequest) -> Result<WalletResponse, WalletApiError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        self.calls.lock().push((op.to_string(), request.clone()));
        let mut balances = self.balances.lock();
        let balance = balances.entry(request.username.clone()).or_default();
        *balance += request.amount;
        Ok(WalletResponse {
            error_code: 0,
            amount: *balance,
        })
    }
}

#[async_trait]
impl WalletApi for ScriptedWalletApi {
    async fn get_user_balance(
        &self,
        username: &str,
        _currency: &str,
    ) -> Result<Decimal, WalletApiError> {
        Ok(self
            .balances
            .lock()
            .get(username)
            .copied()
            .unwrap_or_default())
    }

    async fn settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError> {
        self.apply("settle", request)
    }

    async fn re_settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError> {
        self.apply("re_settle", request)
    }

    async fn cancel_round(
        &self,
        request: &WalletRequest,
    ) -> Result<WalletResponse, WalletApiError> {
        self.apply("cancel_round", request)
    }
}

/// Memory store whose hash inserts can be switched to fail, the way a Redis
/// outage surfaces to the job queue.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_hash_writes: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_hash_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_hash_writes(&self, fail: bool) {
        self.fail_hash_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_hash_writes.load(Ordering::SeqCst) {
            Err(CacheError::WrongType(key.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.del(key).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        self.inner.rpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.lpop(key).await
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.inner.lrange(key, start, stop).await
    }

    async fn lset(&self, key: &str, index: isize, value: &str) -> Result<(), CacheError> {
        self.inner.lset(key, index, value).await
    }

    async fn llen(&self, key: &str) -> Result<usize, CacheError> {
        self.inner.llen(key).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.check(key)?;
        self.inner.hset(key, field, value).await
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.check(key)?;
        self.inner.hset_nx(key, field, value).await
    }

    async fn hset_xx(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.check(key)?;
        self.inner.hset_xx(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.inner.hget(key, field).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        self.inner.hdel(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError> {
        self.inner.hgetall(key).await
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.inner.hincr(key, field, delta).await
    }
}

/// In-memory engine: ledger, cache, queues, controller and processor.
pub struct Harness {
    pub config: EngineConfig,
    pub ledger: Arc<InMemoryLedgerStorage>,
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub broadcast: Arc<RecordingBroadcast>,
    pub wallet: Arc<ScriptedWalletApi>,
    pub settlements: Arc<JobQueue>,
    pub timers: Arc<JobQueue>,
    pub controller: Arc<RoundController>,
    pub processor: Arc<SettlementProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let ledger = Arc::new(InMemoryLedgerStorage::new());
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let kv: Arc<dyn KeyValueStore> = faults.clone();
        let broadcast = Arc::new(RecordingBroadcast::default());
        let wallet = Arc::new(ScriptedWalletApi::default());
        let settlements = Arc::new(JobQueue::new(Arc::clone(&kv), SETTLEMENT_QUEUE));
        let timers = Arc::new(JobQueue::new(Arc::clone(&kv), ROUND_TIMER_QUEUE));
        let controller = Arc::new(RoundController::new(
            ledger.clone(),
            Arc::clone(&kv),
            settlements.clone(),
            timers.clone(),
            broadcast.clone(),
            config.clone(),
        ));
        let processor = Arc::new(SettlementProcessor::new(
            ledger.clone(),
            kv,
            wallet.clone(),
            broadcast.clone(),
            config.applied_marker_ttl,
        ));
        Self {
            config,
            ledger,
            store,
            faults,
            broadcast,
            wallet,
            settlements,
            timers,
            controller,
            processor,
        }
    }

    pub async fn create_table(
        &self,
        table_no: &str,
        game_type: GameType,
        current_shoe: i64,
    ) -> anyhow::Result<TableRecord> {
        let mut txn = self.ledger.begin().await?;
        let table = txn
            .insert_table(NewTable {
                lobby_no: 1,
                table_no: table_no.to_string(),
                game_type,
                countdown_secs: 15,
                current_shoe,
                dealer: None,
            })
            .await?;
        txn.commit().await?;
        Ok(table)
    }

    pub async fn create_user(
        &self,
        username: &str,
        balance: Decimal,
        wallet_mode: WalletMode,
    ) -> anyhow::Result<UserRecord> {
        let mut txn = self.ledger.begin().await?;
        let user = txn
            .insert_user(NewUser {
                username: username.to_string(),
                currency: "USD".to_string(),
                balance,
                wallet_mode,
                user_type: UserType::Player,
                comm_rate: Decimal::ZERO,
            })
            .await?;
        txn.commit().await?;
        Ok(user)
    }

    /// Record a wager and debit its stake, as the bet-placement service does.
    pub async fn place_bet(
        &self,
        round_id: RoundId,
        user_id: UserId,
        bets: &[(BetCode, Decimal)],
    ) -> anyhow::Result<TempOrder> {
        let mut txn = self.ledger.begin().await?;
        let round = txn
            .load_round(round_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("round {round_id} missing"))?;
        let order = txn
            .insert_temp_order(NewTempOrder {
                round_id,
                table_id: round.table_id,
                user_id,
                bets: bets.iter().copied().collect(),
                currency: "USD".to_string(),
                source: None,
                ip: None,
                user_type: UserType::Player,
            })
            .await?;
        txn.adjust_balance(user_id, -order.bet_amount).await?;
        txn.commit().await?;
        Ok(order)
    }

    pub async fn balance(&self, user_id: UserId) -> anyhow::Result<Decimal> {
        let mut txn = self.ledger.begin().await?;
        let user = txn.load_user(user_id).await?;
        txn.rollback().await;
        user.map(|user| user.balance)
            .ok_or_else(|| anyhow::anyhow!("user {user_id} missing"))
    }

    pub async fn stats(&self, user_id: UserId) -> anyhow::Result<Option<UserStats>> {
        let mut txn = self.ledger.begin().await?;
        let stats = txn.load_stats(user_id).await?;
        txn.rollback().await;
        Ok(stats)
    }

    pub async fn round(&self, round_id: RoundId) -> anyhow::Result<RoundRecord> {
        let mut txn = self.ledger.begin().await?;
        let round = txn.load_round(round_id).await?;
        txn.rollback().await;
        round.ok_or_else(|| anyhow::anyhow!("round {round_id} missing"))
    }

    pub async fn save_round(&self, round: &RoundRecord) -> anyhow::Result<()> {
        let mut txn = self.ledger.begin().await?;
        let stored = txn
            .load_round(round.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("round {} missing", round.id))?;
        txn.update_round(round, stored.status).await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn bet_order(&self, order_id: OrderId) -> anyhow::Result<Option<BetOrder>> {
        let mut txn = self.ledger.begin().await?;
        let order = txn.load_bet_order(order_id).await?;
        txn.rollback().await;
        Ok(order)
    }

    pub async fn temp_orders(&self, round_id: RoundId) -> anyhow::Result<Vec<TempOrder>> {
        let mut txn = self.ledger.begin().await?;
        let orders = txn.temp_orders_for_round(round_id).await?;
        txn.rollback().await;
        Ok(orders)
    }

    /// Settlement jobs staged in the ledger and not yet relayed.
    pub async fn staged_jobs(&self) -> anyhow::Result<Vec<String>> {
        let mut txn = self.ledger.begin().await?;
        let staged = txn.staged_jobs(usize::MAX).await?;
        txn.rollback().await;
        Ok(staged.into_iter().map(|entry| entry.job_key).collect())
    }

    pub async fn relay_outbox(&self) -> anyhow::Result<RelayReport> {
        Ok(self.controller.outbox().relay_pending(now_millis()).await?)
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::from(&self.config)
    }

    /// Run every pending settlement job, including retries, to completion.
    pub async fn drain_settlements(&self) -> anyhow::Result<PassReport> {
        let worker = JobWorker::new(
            self.settlements.clone(),
            self.processor.clone(),
            self.worker_config(),
        );
        let mut total = PassReport::default();
        for _ in 0..16 {
            let report = worker.run_due(i64::MAX / 2).await?;
            total.completed += report.completed;
            total.retried += report.retried;
            total.dead += report.dead;
            if self.settlements.len().await? == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Run round timers due `ahead_ms` from now.
    pub async fn fire_timers(&self, ahead_ms: i64) -> anyhow::Result<PassReport> {
        let worker = JobWorker::new(
            self.timers.clone(),
            Arc::new(RoundTimerHandler::new(self.controller.clone())),
            self.worker_config(),
        );
        Ok(worker.run_due(now_millis() + ahead_ms).await?)
    }
}
