use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::broadcast::{
    BroadcastGateway, EVENT_BETTING_STOPPED, EVENT_BET_VOLUME, EVENT_COUNTDOWN,
    EVENT_ROUND_CANCELLED, EVENT_ROUND_RESETTLED, EVENT_ROUND_SETTLED, EVENT_ROUND_STARTED,
    EVENT_SHUFFLED,
};
use crate::cache::{
    HistoryEntry, KeyValueStore, RoundHistoryCache, RouletteStats, TableStateCache,
};
use crate::config::EngineConfig;
use crate::game::{calculator_for, GameType, HitResult, OddsCalculator};
use crate::jobs::{JobOptions, JobQueue, OutboxRelay, Repeat, RoundTimerJob, SettlementJob};
use crate::ledger::{
    BetOrder, LedgerStorage, LedgerTxn, NewRound, OrderStatus, RoundId, RoundRecord,
    RoundStatus, SettlementKind, StorageError, TableId, TempOrder,
};
use crate::lock::{LockManager, LockType};
use crate::tokio_tools::now_millis;

use super::error::RoundError;
use super::shoe::{next_shoe_no, round_sn};
use super::types::{
    BetVolume, CancelSummary, RoundStarted, SettleRequest, SettleSummary, ShuffleSummary,
    TableState,
};

const LOG_TARGET: &str = "round::controller";

type Txn = Box<dyn LedgerTxn + Send>;

/// Commit on success, roll back on failure.
async fn finish<T>(txn: Txn, result: Result<T, RoundError>) -> Result<T, RoundError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            txn.rollback().await;
            Err(err)
        }
    }
}

fn history_entry(round: &RoundRecord) -> HistoryEntry {
    HistoryEntry {
        round_id: round.id,
        round_no: round.round_no,
        shoe_no: round.shoe_no,
        round_sn: round.round_sn.clone(),
        status: round.status,
        result: round.result.clone().unwrap_or_default(),
        details: round.details.clone(),
        settle_time: round.settle_time,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

/// Finalized orders and the money movements they imply.
struct Scored {
    round: RoundRecord,
    orders: usize,
    jobs: Vec<SettlementJob>,
    /// Jobs written to the outbox, keyed for the queue.
    staged: Vec<(String, Value)>,
}

/// Persist a round whose status was read as `expected` in this transaction.
async fn save_round(
    txn: &mut (dyn LedgerTxn + Send),
    round: &RoundRecord,
    expected: RoundStatus,
) -> Result<(), RoundError> {
    txn.update_round(round, expected).await.map_err(|err| match err {
        StorageError::Conflict(_) => RoundError::RoundStateConflict(round.id),
        other => other.into(),
    })
}

/// Write the jobs that move money to the outbox of the current transaction.
async fn stage_jobs(
    txn: &mut (dyn LedgerTxn + Send),
    jobs: &[SettlementJob],
) -> Result<Vec<(String, Value)>, RoundError> {
    let mut staged = Vec::with_capacity(jobs.len());
    for job in jobs.iter().filter(|job| !job.is_noop()) {
        let job_key = job.job_key();
        let payload = serde_json::to_value(job).map_err(|err| {
            StorageError::validation(format!("settlement job {job_key} not serializable: {err}"))
        })?;
        txn.stage_job(&job_key, payload.clone()).await?;
        staged.push((job_key, payload));
    }
    Ok(staged)
}

/// Per-table round state machine.
///
/// Every mutating operation takes its table lease first and fails fast with
/// [`RoundError::Locked`] when another caller holds it. Durable writes happen
/// in one ledger transaction together with the settlement jobs they imply;
/// the caches, timers, queue hand-off and broadcasts follow after commit.
pub struct RoundController {
    ledger: Arc<dyn LedgerStorage>,
    tables: TableStateCache,
    history: RoundHistoryCache,
    locks: LockManager,
    outbox: Arc<OutboxRelay>,
    timers: Arc<JobQueue>,
    broadcast: Arc<dyn BroadcastGateway>,
    config: EngineConfig,
}

impl RoundController {
    pub fn new(
        ledger: Arc<dyn LedgerStorage>,
        store: Arc<dyn KeyValueStore>,
        settlements: Arc<JobQueue>,
        timers: Arc<JobQueue>,
        broadcast: Arc<dyn BroadcastGateway>,
        config: EngineConfig,
    ) -> Self {
        let settlement_options = JobOptions {
            attempts: config.job_attempts,
            backoff: config.backoff_base,
            delay: Duration::ZERO,
            repeat: None,
        };
        Self {
            outbox: Arc::new(OutboxRelay::new(
                Arc::clone(&ledger),
                settlements,
                settlement_options,
            )),
            ledger,
            tables: TableStateCache::new(Arc::clone(&store)),
            history: RoundHistoryCache::new(Arc::clone(&store), config.history_cap),
            locks: LockManager::new(store),
            timers,
            broadcast,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Relay of the settlement outbox, for the background pass.
    pub fn outbox(&self) -> Arc<OutboxRelay> {
        Arc::clone(&self.outbox)
    }

    async fn acquire(&self, lock: LockType, table_id: TableId, ttl: Duration) -> Result<(), RoundError> {
        if self.locks.try_acquire(lock, table_id, ttl).await? {
            Ok(())
        } else {
            tracing::warn!(target: LOG_TARGET, %lock, table_id, "rejected: lease held");
            Err(RoundError::Locked { lock, table_id })
        }
    }

    /// Cached table state, re-derived from the ledger on a miss.
    pub async fn table_state(&self, table_id: TableId) -> Result<TableState, RoundError> {
        match self.tables.get(table_id).await {
            Ok(Some(state)) => return Ok(state),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(target: LOG_TARGET, table_id, error = %err, "unreadable table state");
                return Err(err.into());
            }
        }
        let mut txn = self.ledger.begin().await?;
        let derived = async {
            let table = txn
                .load_table(table_id)
                .await?
                .ok_or(RoundError::TableNotFound(table_id))?;
            let latest = txn.latest_round(table_id).await?;
            Ok::<_, RoundError>(TableState::derive(&table, latest.as_ref()))
        }
        .await;
        txn.rollback().await;
        let state = derived?;
        self.publish_state(&state).await;
        Ok(state)
    }

    /// Best-effort write-through. A failed write drops the entry so the next
    /// read re-derives it.
    async fn publish_state(&self, state: &TableState) {
        if let Err(err) = self.tables.put(state).await {
            tracing::warn!(target: LOG_TARGET, table_id = state.table_id, error = %err, "table state write failed");
            if let Err(err) = self.tables.invalidate(state.table_id).await {
                tracing::error!(target: LOG_TARGET, table_id = state.table_id, error = %err, "table state invalidation failed");
            }
        }
    }

    /// Mirror a round into the table state if it is still the current one.
    async fn refresh_state(&self, round: &RoundRecord) -> Result<(), RoundError> {
        let mut state = self.table_state(round.table_id).await?;
        if state.current_round_id == Some(round.id) {
            state.track(round);
            self.publish_state(&state).await;
        }
        Ok(())
    }

    pub async fn history(&self, table_id: TableId) -> Result<Vec<HistoryEntry>, RoundError> {
        Ok(self.history.entries(table_id).await?)
    }

    pub async fn roulette_stats(&self, table_id: TableId) -> Result<RouletteStats, RoundError> {
        Ok(self.history.roulette_stats(table_id).await?)
    }

    pub async fn start_game(&self, table_id: TableId) -> Result<RoundStarted, RoundError> {
        self.acquire(LockType::StartGame, table_id, self.config.start_lock_ttl)
            .await?;
        let result = self.start_game_locked(table_id).await;
        self.locks.release(LockType::StartGame, table_id).await;
        result
    }

    async fn start_game_locked(&self, table_id: TableId) -> Result<RoundStarted, RoundError> {
        let mut state = self.table_state(table_id).await?;
        let now = Utc::now();
        let mut txn = self.ledger.begin().await?;
        let result = self.open_round(txn.as_mut(), &state, now).await;
        let (round, countdown) = finish(txn, result).await?;

        state.track(&round);
        state.shuffle = false;
        self.publish_state(&state).await;
        self.schedule_timers(&round, countdown).await;

        let started = RoundStarted {
            table_id,
            round_id: round.id,
            shoe_no: round.shoe_no,
            round_no: round.round_no,
            round_sn: round.round_sn.clone(),
            end_time: round.end_time,
        };
        self.broadcast
            .global_broadcast(EVENT_ROUND_STARTED, json!(started))
            .await;
        tracing::info!(
            target: LOG_TARGET,
            table_id,
            round_id = round.id,
            round_sn = %round.round_sn,
            "round started"
        );
        Ok(started)
    }

    async fn open_round(
        &self,
        txn: &mut (dyn LedgerTxn + Send),
        state: &TableState,
        now: DateTime<Utc>,
    ) -> Result<(RoundRecord, Duration), RoundError> {
        let table_id = state.table_id;
        let table = txn
            .load_table(table_id)
            .await?
            .ok_or(RoundError::TableNotFound(table_id))?;
        if table.maintain {
            return Err(RoundError::NotAllowStart {
                table_id,
                reason: "table is under maintenance",
            });
        }
        if state.is_busy() {
            return Err(RoundError::NotAllowStart {
                table_id,
                reason: "a round is still open",
            });
        }

        let mut shoe_no = table.current_shoe;
        let mut round_no = if state.current_shoe == table.current_shoe {
            state.current_round_no + 1
        } else {
            1
        };
        if table.game_type.is_shoe_game() {
            if shoe_no < 1 {
                return Err(RoundError::ShoeNotReady(table_id));
            }
            if round_no > self.config.round_rollover {
                return Err(RoundError::ShoeExhausted { table_id, shoe_no });
            }
        } else if shoe_no < 1 || round_no > self.config.round_rollover {
            shoe_no = next_shoe_no(shoe_no, Local::now().date_naive());
            round_no = 1;
            txn.update_table_shoe(table_id, shoe_no).await?;
        }

        let countdown = if table.countdown_secs == 0 {
            self.config.default_countdown
        } else {
            Duration::from_secs(u64::from(table.countdown_secs))
        };
        let round = txn
            .insert_round(NewRound {
                table_id,
                lobby_no: table.lobby_no,
                table_no: table.table_no.clone(),
                game_type: table.game_type,
                shoe_no,
                round_no,
                round_sn: round_sn(&table.table_no, shoe_no, round_no),
                dealer: table.dealer.as_ref().map(|dealer| dealer.name.clone()),
                start_time: now,
                end_time: now + to_chrono(countdown),
            })
            .await?;
        Ok((round, countdown))
    }

    async fn schedule_timers(&self, round: &RoundRecord, countdown: Duration) {
        let now_ms = now_millis();
        let stop = RoundTimerJob::StopBetting {
            table_id: round.table_id,
            round_id: round.id,
        };
        let options = JobOptions {
            attempts: self.config.job_attempts,
            backoff: self.config.backoff_base,
            delay: countdown,
            repeat: None,
        };
        if let Err(err) = self.timers.enqueue(&stop.job_id(), &stop, options, now_ms).await {
            // Settle still accepts a Betting round whose end time has passed.
            tracing::error!(target: LOG_TARGET, round_id = round.id, error = %err, "failed to schedule stop-betting");
        }

        let tick = self.config.tick_interval;
        if tick.is_zero() || tick >= countdown {
            return;
        }
        let tick_job = RoundTimerJob::Tick {
            table_id: round.table_id,
            round_id: round.id,
        };
        let options = JobOptions {
            attempts: 1,
            backoff: self.config.backoff_base,
            delay: tick,
            repeat: Some(Repeat {
                every: tick,
                until_ms: round.end_time.timestamp_millis(),
            }),
        };
        if let Err(err) = self
            .timers
            .enqueue(&tick_job.job_id(), &tick_job, options, now_ms)
            .await
        {
            tracing::warn!(target: LOG_TARGET, round_id = round.id, error = %err, "failed to schedule countdown ticks");
        }
    }

    async fn cancel_timers(&self, table_id: TableId, round_id: RoundId) {
        let jobs = [
            RoundTimerJob::StopBetting { table_id, round_id },
            RoundTimerJob::Tick { table_id, round_id },
        ];
        for job in jobs {
            if let Err(err) = self.timers.remove(&job.job_id()).await {
                tracing::warn!(target: LOG_TARGET, job_id = %job.job_id(), error = %err, "failed to drop timer");
            }
        }
    }

    /// Close betting. A no-op returning `false` unless `round_id` is the
    /// table's current round and still betting, so stale or duplicate timer
    /// fires are harmless.
    pub async fn stop_betting(&self, table_id: TableId, round_id: RoundId) -> Result<bool, RoundError> {
        let state = self.table_state(table_id).await?;
        if state.current_round_id != Some(round_id) || state.status() != Some(RoundStatus::Betting) {
            tracing::debug!(target: LOG_TARGET, table_id, round_id, "stop-betting ignored");
            return Ok(false);
        }

        let mut txn = self.ledger.begin().await?;
        let result = async {
            let mut round = txn
                .load_round(round_id)
                .await?
                .ok_or(RoundError::RoundNotFound(round_id))?;
            if round.status != RoundStatus::Betting {
                return Ok((round, None));
            }
            round.status = RoundStatus::Dealing;
            round.end_time = Utc::now();
            save_round(txn.as_mut(), &round, RoundStatus::Betting).await?;
            let orders = txn.temp_orders_for_round(round_id).await?;
            Ok::<_, RoundError>((round, Some(orders)))
        }
        .await;
        let (round, orders) = match finish(txn, result).await {
            Ok(done) => done,
            Err(RoundError::RoundStateConflict(_)) => {
                tracing::debug!(target: LOG_TARGET, table_id, round_id, "stop-betting lost the race; ignored");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        self.refresh_state(&round).await?;
        let Some(orders) = orders else {
            return Ok(false);
        };
        self.cancel_timers(table_id, round_id).await;

        self.broadcast
            .global_broadcast(
                EVENT_BETTING_STOPPED,
                json!({ "tableId": table_id, "roundId": round_id }),
            )
            .await;
        self.broadcast
            .global_broadcast(
                EVENT_BET_VOLUME,
                json!(BetVolume::from_orders(round_id, &orders)),
            )
            .await;
        tracing::info!(target: LOG_TARGET, table_id, round_id, orders = orders.len(), "betting stopped");
        Ok(true)
    }

    /// Broadcast the remaining betting time of the current round.
    pub async fn countdown_tick(&self, table_id: TableId, round_id: RoundId) -> Result<(), RoundError> {
        let state = self.table_state(table_id).await?;
        if state.current_round_id != Some(round_id) || state.status() != Some(RoundStatus::Betting) {
            return Ok(());
        }
        let remaining_ms = state
            .round_end_time
            .map(|end| (end - Utc::now()).num_milliseconds().max(0))
            .unwrap_or(0);
        self.broadcast
            .global_broadcast(
                EVENT_COUNTDOWN,
                json!({ "tableId": table_id, "roundId": round_id, "remainingMs": remaining_ms }),
            )
            .await;
        Ok(())
    }

    /// Hit result of a settle request. Raw details win over a reported result.
    fn resolve_outcome(
        &self,
        calc: &dyn OddsCalculator,
        request: &SettleRequest,
    ) -> Result<(HitResult, Option<Value>), RoundError> {
        match (&request.details, &request.result) {
            (Some(details), reported) => {
                let hits = calc.parse_result(details).map_err(|err| {
                    tracing::error!(
                        target: LOG_TARGET,
                        round_id = request.round_id,
                        %details,
                        error = %err,
                        "outcome details rejected"
                    );
                    RoundError::InvalidOutcome(err)
                })?;
                if let Some(reported) = reported {
                    if HitResult::from_codes(reported.iter().copied()) != hits {
                        tracing::warn!(
                            target: LOG_TARGET,
                            round_id = request.round_id,
                            reported = ?reported,
                            computed = ?hits.codes(),
                            "reported result overridden by details"
                        );
                    }
                }
                Ok((hits, Some(details.clone())))
            }
            (None, Some(reported)) => Ok((HitResult::from_codes(reported.iter().copied()), None)),
            (None, None) => Err(RoundError::MissingOutcome),
        }
    }

    async fn load_round_for(
        txn: &mut (dyn LedgerTxn + Send),
        request: &SettleRequest,
    ) -> Result<RoundRecord, RoundError> {
        let round = txn
            .load_round(request.round_id)
            .await?
            .filter(|round| round.table_id == request.table_id)
            .ok_or(RoundError::RoundNotFound(request.round_id))?;
        if round.game_type != request.game_type {
            return Err(RoundError::GameTypeMismatch {
                expected: request.game_type,
                actual: round.game_type,
            });
        }
        Ok(round)
    }

    pub async fn settle(&self, request: SettleRequest) -> Result<SettleSummary, RoundError> {
        let table_id = request.table_id;
        self.acquire(LockType::SettleRound, table_id, self.config.settle_lock_ttl)
            .await?;
        let result = self.settle_locked(&request).await;
        self.locks.release(LockType::SettleRound, table_id).await;
        if let Err(err) = &result {
            if err.is_business() {
                tracing::warn!(target: LOG_TARGET, table_id, round_id = request.round_id, code = err.code(), error = %err, "settle rejected");
            }
        }
        result
    }

    async fn settle_locked(&self, request: &SettleRequest) -> Result<SettleSummary, RoundError> {
        let calc = calculator_for(request.game_type);
        let mut txn = self.ledger.begin().await?;
        let result = self.score_round(txn.as_mut(), calc, request).await;
        let scored = finish(txn, result).await?;

        let round = &scored.round;
        self.refresh_state(round).await?;
        self.cancel_timers(round.table_id, round.id).await;
        if let Err(err) = self
            .history
            .append(round.table_id, round.game_type, &history_entry(round))
            .await
        {
            tracing::error!(target: LOG_TARGET, round_id = round.id, error = %err, "history append failed");
        }
        self.forward_jobs(&scored.staged).await;

        self.broadcast
            .global_broadcast(
                EVENT_ROUND_SETTLED,
                json!({
                    "tableId": round.table_id,
                    "roundId": round.id,
                    "roundSn": round.round_sn,
                    "result": round.result,
                    "details": round.details,
                }),
            )
            .await;
        tracing::info!(
            target: LOG_TARGET,
            table_id = round.table_id,
            round_id = round.id,
            orders = scored.orders,
            jobs = scored.jobs.len(),
            "round settled"
        );
        Ok(self.summary(scored))
    }

    fn summary(&self, scored: Scored) -> SettleSummary {
        SettleSummary {
            table_id: scored.round.table_id,
            round_id: scored.round.id,
            round_sn: scored.round.round_sn.clone(),
            status: scored.round.status,
            result: scored.round.result.clone().unwrap_or_default(),
            orders: scored.orders,
            jobs: scored.jobs.len(),
        }
    }

    async fn score_round(
        &self,
        txn: &mut (dyn LedgerTxn + Send),
        calc: &dyn OddsCalculator,
        request: &SettleRequest,
    ) -> Result<Scored, RoundError> {
        let mut round = Self::load_round_for(txn, request).await?;
        let now = Utc::now();
        match round.status {
            RoundStatus::Dealing => {}
            RoundStatus::Betting if round.end_time <= now => {
                tracing::warn!(target: LOG_TARGET, round_id = round.id, "settling a round whose stop-betting was missed");
            }
            RoundStatus::Over | RoundStatus::Resettle => {
                return Err(RoundError::RoundAlreadySettled(round.id));
            }
            status => {
                return Err(RoundError::RoundNotSettleable {
                    round_id: round.id,
                    status,
                });
            }
        }
        let (hits, details) = self.resolve_outcome(calc, request)?;

        let temp_orders = txn.temp_orders_for_round(round.id).await?;
        let mut jobs = Vec::with_capacity(temp_orders.len());
        for temp in &temp_orders {
            let win_lose = calc.calc_win_lose(&temp.bets, &hits)?;
            let rolling = calc.calc_rolling(temp.bet_amount, &temp.bets, &hits);
            let comm = txn
                .load_user(temp.user_id)
                .await?
                .map(|user| user.comm_rate)
                .unwrap_or(Decimal::ZERO);
            let mut order =
                finalized_order(&round, temp, comm, now, OrderStatus::Settled, win_lose, rolling);
            attach_outcome(&mut order, &hits, details.as_ref());
            // Insert before delete: a crash in between leaves a duplicate,
            // never a lost order.
            txn.insert_bet_order(&order).await?;
            txn.delete_temp_order(temp.id).await?;
            jobs.push(settlement_job(
                SettlementKind::Settle,
                &round,
                &order,
                win_lose,
                temp.bet_amount,
                rolling,
                Some(&hits),
            ));
        }
        let staged = stage_jobs(txn, &jobs).await?;

        let expected = round.status;
        transition(&mut round, RoundStatus::Over)?;
        round.result = Some(hits);
        round.details = details;
        round.settle_time = Some(now);
        save_round(txn, &round, expected).await?;
        Ok(Scored {
            round,
            orders: temp_orders.len(),
            jobs,
            staged,
        })
    }

    pub async fn re_settle(&self, request: SettleRequest) -> Result<SettleSummary, RoundError> {
        let table_id = request.table_id;
        self.acquire(LockType::ResettleRound, table_id, self.config.settle_lock_ttl)
            .await?;
        let result = self.re_settle_locked(&request).await;
        self.locks.release(LockType::ResettleRound, table_id).await;
        if let Err(err) = &result {
            if err.is_business() {
                tracing::warn!(target: LOG_TARGET, table_id, round_id = request.round_id, code = err.code(), error = %err, "resettle rejected");
            }
        }
        result
    }

    async fn re_settle_locked(&self, request: &SettleRequest) -> Result<SettleSummary, RoundError> {
        let calc = calculator_for(request.game_type);
        let mut txn = self.ledger.begin().await?;
        let result = self.rescore_round(txn.as_mut(), calc, request).await;
        let scored = finish(txn, result).await?;

        let round = &scored.round;
        self.refresh_state(round).await?;
        if let Err(err) = self
            .history
            .patch(round.table_id, round.game_type, &history_entry(round))
            .await
        {
            tracing::error!(target: LOG_TARGET, round_id = round.id, error = %err, "history patch failed");
        }
        self.forward_jobs(&scored.staged).await;

        self.broadcast
            .global_broadcast(
                EVENT_ROUND_RESETTLED,
                json!({
                    "tableId": round.table_id,
                    "roundId": round.id,
                    "roundSn": round.round_sn,
                    "result": round.result,
                    "details": round.details,
                }),
            )
            .await;
        tracing::info!(
            target: LOG_TARGET,
            table_id = round.table_id,
            round_id = round.id,
            revision = round.resettle_count,
            jobs = scored.jobs.len(),
            "round resettled"
        );
        Ok(self.summary(scored))
    }

    async fn rescore_round(
        &self,
        txn: &mut (dyn LedgerTxn + Send),
        calc: &dyn OddsCalculator,
        request: &SettleRequest,
    ) -> Result<Scored, RoundError> {
        let mut round = Self::load_round_for(txn, request).await?;
        if !matches!(round.status, RoundStatus::Over | RoundStatus::Resettle) {
            return Err(RoundError::RoundNotResettleable {
                round_id: round.id,
                status: round.status,
            });
        }
        let (hits, details) = self.resolve_outcome(calc, request)?;
        let now = Utc::now();

        let orders = txn.bet_orders_for_round(round.id).await?;
        let mut jobs = Vec::with_capacity(orders.len());
        let mut rescored = 0;
        for mut order in orders {
            if order.status == OrderStatus::Cancel {
                continue;
            }
            let win_lose = calc.calc_win_lose(&order.bets, &hits)?;
            let rolling = calc.calc_rolling(order.bet_amount, &order.bets, &hits);
            let change = win_lose - order.settle_result;
            let rolling_change = rolling - order.rolling;

            order.settle_result = win_lose;
            order.rolling = rolling;
            order.status = OrderStatus::Resettled;
            order.resettle_count += 1;
            order.settle_time = now;
            attach_outcome(&mut order, &hits, details.as_ref());
            txn.update_bet_order(&order).await?;
            rescored += 1;
            jobs.push(settlement_job(
                SettlementKind::Resettle,
                &round,
                &order,
                change,
                Decimal::ZERO,
                rolling_change,
                Some(&hits),
            ));
        }
        let staged = stage_jobs(txn, &jobs).await?;

        let expected = round.status;
        transition(&mut round, RoundStatus::Resettle)?;
        round.result = Some(hits);
        round.details = details;
        round.settle_time = Some(now);
        round.resettle_count += 1;
        save_round(txn, &round, expected).await?;
        Ok(Scored {
            round,
            orders: rescored,
            jobs,
            staged,
        })
    }

    pub async fn cancel_round(&self, round_id: RoundId) -> Result<CancelSummary, RoundError> {
        let table_id = {
            let mut txn = self.ledger.begin().await?;
            let round = txn.load_round(round_id).await;
            txn.rollback().await;
            round?.ok_or(RoundError::RoundNotFound(round_id))?.table_id
        };
        self.acquire(LockType::CancelRound, table_id, self.config.settle_lock_ttl)
            .await?;
        let result = self.cancel_locked(round_id).await;
        self.locks.release(LockType::CancelRound, table_id).await;
        if let Err(err) = &result {
            if err.is_business() {
                tracing::warn!(target: LOG_TARGET, table_id, round_id, code = err.code(), error = %err, "cancel rejected");
            }
        }
        result
    }

    async fn cancel_locked(&self, round_id: RoundId) -> Result<CancelSummary, RoundError> {
        let mut txn = self.ledger.begin().await?;
        let result = Self::void_round(txn.as_mut(), round_id).await;
        let (scored, previous_status) = finish(txn, result).await?;

        let round = &scored.round;
        self.refresh_state(round).await?;
        self.cancel_timers(round.table_id, round.id).await;
        if let Err(err) = self
            .history
            .patch(round.table_id, round.game_type, &history_entry(round))
            .await
        {
            tracing::error!(target: LOG_TARGET, round_id, error = %err, "history patch failed");
        }
        self.forward_jobs(&scored.staged).await;

        self.broadcast
            .global_broadcast(
                EVENT_ROUND_CANCELLED,
                json!({ "tableId": round.table_id, "roundId": round.id, "roundSn": round.round_sn }),
            )
            .await;
        tracing::info!(
            target: LOG_TARGET,
            table_id = round.table_id,
            round_id,
            previous_status = ?previous_status,
            jobs = scored.jobs.len(),
            "round cancelled"
        );
        Ok(CancelSummary {
            table_id: round.table_id,
            round_id,
            previous_status,
            orders: scored.orders,
            jobs: scored.jobs.len(),
        })
    }

    async fn void_round(
        txn: &mut (dyn LedgerTxn + Send),
        round_id: RoundId,
    ) -> Result<(Scored, RoundStatus), RoundError> {
        let mut round = txn
            .load_round(round_id)
            .await?
            .ok_or(RoundError::RoundNotFound(round_id))?;
        let previous_status = round.status;
        if matches!(previous_status, RoundStatus::Betting | RoundStatus::Cancel) {
            return Err(RoundError::RoundNotCancellable {
                round_id,
                status: previous_status,
            });
        }
        let now = Utc::now();
        let mut jobs = Vec::new();
        let mut orders = 0;

        if previous_status == RoundStatus::Dealing {
            // Nothing was scored yet: hand every stake back.
            for temp in txn.temp_orders_for_round(round_id).await? {
                let order = finalized_order(
                    &round,
                    &temp,
                    Decimal::ZERO,
                    now,
                    OrderStatus::Cancel,
                    Decimal::ZERO,
                    Decimal::ZERO,
                );
                txn.insert_bet_order(&order).await?;
                txn.delete_temp_order(temp.id).await?;
                orders += 1;
                jobs.push(settlement_job(
                    SettlementKind::Cancel,
                    &round,
                    &order,
                    Decimal::ZERO,
                    temp.bet_amount,
                    Decimal::ZERO,
                    None,
                ));
            }
        } else {
            // Reverse whatever the orders currently stand at.
            for mut order in txn.bet_orders_for_round(round_id).await? {
                if order.status == OrderStatus::Cancel {
                    continue;
                }
                let change = -order.settle_result;
                let rolling_change = -order.rolling;
                order.settle_result = Decimal::ZERO;
                order.rolling = Decimal::ZERO;
                order.status = OrderStatus::Cancel;
                order.settle_time = now;
                txn.update_bet_order(&order).await?;
                orders += 1;
                jobs.push(settlement_job(
                    SettlementKind::Cancel,
                    &round,
                    &order,
                    change,
                    Decimal::ZERO,
                    rolling_change,
                    round.result.as_ref(),
                ));
            }
        }
        let staged = stage_jobs(txn, &jobs).await?;

        transition(&mut round, RoundStatus::Cancel)?;
        round.settle_time = Some(now);
        save_round(txn, &round, previous_status).await?;
        Ok((
            Scored {
                round,
                orders,
                jobs,
                staged,
            },
            previous_status,
        ))
    }

    /// Hand staged jobs to the settlement queue. Failures leave them staged
    /// for the relay pass, so the committed round stands either way.
    async fn forward_jobs(&self, staged: &[(String, Value)]) {
        if staged.is_empty() {
            return;
        }
        match self.outbox.forward(staged, now_millis()).await {
            Ok(report) if report.left > 0 => {
                tracing::warn!(
                    target: LOG_TARGET,
                    forwarded = report.forwarded,
                    left = report.left,
                    "settlement jobs deferred to the outbox relay"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(target: LOG_TARGET, error = %err, "settlement jobs deferred to the outbox relay");
            }
        }
    }

    /// Advance the shoe. Card-shoe games always start an empty history;
    /// other games clear theirs only on `reset`.
    pub async fn shuffle(&self, table_id: TableId, reset: bool) -> Result<ShuffleSummary, RoundError> {
        self.acquire(LockType::StartGame, table_id, self.config.start_lock_ttl)
            .await?;
        let result = self.shuffle_locked(table_id, reset).await;
        self.locks.release(LockType::StartGame, table_id).await;
        result
    }

    async fn reset_history(&self, table_id: TableId, game: GameType) -> Result<(), RoundError> {
        self.history.clear(table_id).await?;
        if game == GameType::Roulette {
            self.history.recompute_roulette_stats(table_id).await?;
        }
        Ok(())
    }

    async fn shuffle_locked(&self, table_id: TableId, reset: bool) -> Result<ShuffleSummary, RoundError> {
        let mut state = self.table_state(table_id).await?;
        if state.is_busy() {
            return Err(RoundError::NotAllowShuffle(table_id));
        }

        let mut txn = self.ledger.begin().await?;
        let result = async {
            let table = txn
                .load_table(table_id)
                .await?
                .ok_or(RoundError::TableNotFound(table_id))?;
            let shoe_no = next_shoe_no(table.current_shoe, Local::now().date_naive());
            txn.update_table_shoe(table_id, shoe_no).await?;
            Ok::<_, RoundError>((table, shoe_no))
        }
        .await;
        let (table, shoe_no) = finish(txn, result).await?;

        let history_cleared = table.game_type.is_shoe_game() || reset;
        if history_cleared {
            if let Err(err) = self.reset_history(table_id, table.game_type).await {
                tracing::error!(target: LOG_TARGET, table_id, error = %err, "history reset failed");
            }
        }

        state.current_shoe = shoe_no;
        state.current_round_no = 0;
        state.current_round_id = None;
        state.play_status = TableState::IDLE;
        state.round_end_time = None;
        state.shuffle = true;
        self.publish_state(&state).await;

        let summary = ShuffleSummary {
            table_id,
            previous_shoe: table.current_shoe,
            shoe_no,
            history_cleared,
        };
        self.broadcast
            .global_broadcast(EVENT_SHUFFLED, json!(summary))
            .await;
        tracing::info!(target: LOG_TARGET, table_id, shoe_no, history_cleared, "shoe advanced");
        Ok(summary)
    }
}

fn transition(round: &mut RoundRecord, next: RoundStatus) -> Result<(), RoundError> {
    if !round.status.can_transition(next) {
        tracing::error!(
            target: LOG_TARGET,
            round_id = round.id,
            from = ?round.status,
            to = ?next,
            "illegal round transition"
        );
        return Err(RoundError::RoundNotSettleable {
            round_id: round.id,
            status: round.status,
        });
    }
    round.status = next;
    Ok(())
}

fn finalized_order(
    round: &RoundRecord,
    temp: &TempOrder,
    comm: Decimal,
    now: DateTime<Utc>,
    status: OrderStatus,
    settle_result: Decimal,
    rolling: Decimal,
) -> BetOrder {
    BetOrder {
        id: temp.id,
        round_id: round.id,
        table_id: round.table_id,
        user_id: temp.user_id,
        game_type: round.game_type,
        round_sn: round.round_sn.clone(),
        bets: temp.bets.clone(),
        bet_amount: temp.bet_amount,
        currency: temp.currency.clone(),
        rolling,
        comm,
        round_result: None,
        round_details: None,
        settle_result,
        status,
        resettle_count: 0,
        bet_time: temp.bet_time,
        settle_time: now,
        user_type: temp.user_type,
    }
}

fn attach_outcome(order: &mut BetOrder, hits: &HitResult, details: Option<&Value>) {
    order.round_result = Some(hits.clone());
    order.round_details = details.cloned();
}

fn settlement_job(
    kind: SettlementKind,
    round: &RoundRecord,
    order: &BetOrder,
    change: Decimal,
    stake_refund: Decimal,
    rolling_change: Decimal,
    hits: Option<&HitResult>,
) -> SettlementJob {
    SettlementJob {
        kind,
        table_id: round.table_id,
        round_id: round.id,
        round_sn: round.round_sn.clone(),
        game_type: round.game_type,
        order_id: order.id,
        user_id: order.user_id,
        bet_amount: order.bet_amount,
        change,
        stake_refund,
        rolling_change,
        revision: if kind == SettlementKind::Resettle {
            order.resettle_count
        } else {
            0
        },
        bets: order.bets.clone(),
        hit_result: hits.cloned(),
    }
}
