//! Money movement for one finalized order.
//!
//! A job carries amounts computed by the round controller; nothing here
//! re-prices bets. Each job is applied at most once: an applied-marker with a
//! bounded TTL short-circuits redeliveries, and the wallet transaction row,
//! unique on the same key, catches anything the marker missed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::broadcast::{BroadcastGateway, EVENT_BALANCE_CHANGED};
use crate::cache::KeyValueStore;
use crate::game::{BetMap, GameType, HitResult};
use crate::ledger::{
    LedgerStorage, LedgerTxn, NewWalletTransaction, OrderId, RoundId, SettlementKind,
    StorageError, TableId, UserId, UserRecord, UserStats, UserType, WalletMode,
};
use crate::wallet::{WalletApi, WalletRequest};

use super::{JobError, JobHandler, JobRecord};

const LOG_TARGET: &str = "jobs::settlement";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementJob {
    pub kind: SettlementKind,
    pub table_id: TableId,
    pub round_id: RoundId,
    pub round_sn: String,
    pub game_type: GameType,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub bet_amount: Decimal,
    /// Movement of the order's recorded settle result.
    pub change: Decimal,
    /// Stake handed back together with `change`.
    pub stake_refund: Decimal,
    pub rolling_change: Decimal,
    /// Resettle ordinal of the order; 0 for settle and cancel.
    #[serde(default)]
    pub revision: u32,
    pub bets: BetMap,
    #[serde(default)]
    pub hit_result: Option<HitResult>,
}

impl SettlementJob {
    /// Identity shared by queue de-duplication, the applied-marker and the
    /// wallet transaction row.
    pub fn job_key(&self) -> String {
        let base = format!("{}:{}:{}", self.kind.as_str(), self.table_id, self.order_id);
        if self.kind == SettlementKind::Resettle && self.revision >= 2 {
            format!("{base}:{}", self.revision)
        } else {
            base
        }
    }

    /// Amount credited to the wallet.
    pub fn credit(&self) -> Decimal {
        self.change + self.stake_refund
    }

    pub fn is_noop(&self) -> bool {
        self.change.is_zero() && self.stake_refund.is_zero()
    }

    fn is_scoring(&self) -> bool {
        !(self.change.is_zero() && self.rolling_change.is_zero())
    }
}

pub fn applied_marker_key(job_key: &str) -> String {
    format!("settle:applied:{job_key}")
}

pub fn balance_key(user_id: UserId) -> String {
    format!("user:{user_id}:balance")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Already applied by an earlier delivery.
    Skipped,
    Credited { balance: Decimal },
}

pub struct SettlementProcessor {
    ledger: Arc<dyn LedgerStorage>,
    store: Arc<dyn KeyValueStore>,
    wallet: Arc<dyn WalletApi>,
    broadcast: Arc<dyn BroadcastGateway>,
    marker_ttl: Duration,
}

fn retryable(err: StorageError) -> JobError {
    match err {
        StorageError::NotFound(_) | StorageError::Corrupt { .. } => JobError::permanent(err),
        other => JobError::retryable(other),
    }
}

impl SettlementProcessor {
    pub fn new(
        ledger: Arc<dyn LedgerStorage>,
        store: Arc<dyn KeyValueStore>,
        wallet: Arc<dyn WalletApi>,
        broadcast: Arc<dyn BroadcastGateway>,
        marker_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            wallet,
            broadcast,
            marker_ttl,
        }
    }

    pub async fn apply(&self, job: &SettlementJob) -> Result<Applied, JobError> {
        let key = job.job_key();
        let marker = applied_marker_key(&key);
        if self
            .store
            .get(&marker)
            .await
            .map_err(JobError::retryable)?
            .is_some()
        {
            tracing::info!(target: LOG_TARGET, job_key = %key, "already applied; skipping");
            return Ok(Applied::Skipped);
        }

        let user = self.load_user(job.user_id).await?;
        let applied = match user.wallet_mode {
            WalletMode::Internal => self.apply_internal(job, &key, &user).await?,
            WalletMode::External => self.apply_external(job, &key, &user).await?,
        };
        self.mark_applied(&marker).await;

        if let Applied::Credited { balance } = applied {
            if let Err(err) = self
                .store
                .set(&balance_key(user.id), &balance.to_string(), None)
                .await
            {
                tracing::warn!(target: LOG_TARGET, user_id = user.id, error = %err, "balance cache update failed");
            }
            self.broadcast
                .push_to_user(
                    user.id,
                    EVENT_BALANCE_CHANGED,
                    json!({
                        "userId": user.id,
                        "orderId": job.order_id,
                        "kind": job.kind,
                        "amount": job.credit(),
                        "balance": balance,
                    }),
                )
                .await;
            tracing::info!(
                target: LOG_TARGET,
                job_key = %key,
                user_id = user.id,
                amount = %job.credit(),
                balance = %balance,
                "settlement applied"
            );
        }
        Ok(applied)
    }

    async fn load_user(&self, user_id: UserId) -> Result<UserRecord, JobError> {
        let mut txn = self.ledger.begin().await.map_err(retryable)?;
        let user = txn.load_user(user_id).await;
        txn.rollback().await;
        user.map_err(retryable)?
            .ok_or_else(|| JobError::Permanent(format!("user {user_id} not found")))
    }

    async fn mark_applied(&self, marker: &str) {
        if let Err(err) = self.store.set(marker, "1", Some(self.marker_ttl)).await {
            tracing::warn!(target: LOG_TARGET, marker, error = %err, "failed to write applied marker");
        }
    }

    async fn apply_internal(
        &self,
        job: &SettlementJob,
        key: &str,
        user: &UserRecord,
    ) -> Result<Applied, JobError> {
        let mut txn = self.ledger.begin().await.map_err(retryable)?;
        match Self::credit_internal(txn.as_mut(), job, key, user).await {
            Ok(applied) => {
                txn.commit().await.map_err(retryable)?;
                Ok(applied)
            }
            Err(err) => {
                txn.rollback().await;
                Err(retryable(err))
            }
        }
    }

    async fn credit_internal(
        txn: &mut (dyn LedgerTxn + Send),
        job: &SettlementJob,
        key: &str,
        user: &UserRecord,
    ) -> Result<Applied, StorageError> {
        if txn.find_transaction(key).await?.is_some() {
            return Ok(Applied::Skipped);
        }
        let balance = txn.adjust_balance(user.id, job.credit()).await?;
        txn.insert_transaction(NewWalletTransaction {
            idempotency_key: key.to_string(),
            user_id: user.id,
            order_id: job.order_id,
            round_id: job.round_id,
            kind: job.kind,
            amount: job.credit(),
            balance_after: balance,
            txd: None,
        })
        .await?;
        Self::record_stats(txn, job, user).await?;
        Ok(Applied::Credited { balance })
    }

    async fn apply_external(
        &self,
        job: &SettlementJob,
        key: &str,
        user: &UserRecord,
    ) -> Result<Applied, JobError> {
        {
            let mut txn = self.ledger.begin().await.map_err(retryable)?;
            let existing = txn.find_transaction(key).await;
            txn.rollback().await;
            if existing.map_err(retryable)?.is_some() {
                return Ok(Applied::Skipped);
            }
        }

        let request = WalletRequest {
            username: user.username.clone(),
            currency: user.currency.clone(),
            amount: job.credit(),
            txd: Uuid::new_v4().to_string(),
            game_id: job.round_sn.clone(),
            table_id: job.table_id,
            bet_infos: json!({
                "orderId": job.order_id,
                "bets": job.bets,
                "betAmount": job.bet_amount,
                "change": job.change,
                "stakeRefund": job.stake_refund,
            }),
            game_infos: json!({
                "roundId": job.round_id,
                "gameType": job.game_type,
                "result": job.hit_result,
            }),
        };
        let response = match job.kind {
            SettlementKind::Settle => self.wallet.settle(&request).await,
            SettlementKind::Resettle => self.wallet.re_settle(&request).await,
            SettlementKind::Cancel => self.wallet.cancel_round(&request).await,
        };
        let response = response.map_err(|err| {
            if err.is_retryable() {
                JobError::retryable(err)
            } else {
                JobError::permanent(err)
            }
        })?;
        // Money has moved upstream; a redelivery must not call again.
        self.mark_applied(&applied_marker_key(key)).await;

        let mut txn = self.ledger.begin().await.map_err(JobError::permanent)?;
        let recorded: Result<(), StorageError> = async {
            txn.set_balance(user.id, response.amount).await?;
            txn.insert_transaction(NewWalletTransaction {
                idempotency_key: key.to_string(),
                user_id: user.id,
                order_id: job.order_id,
                round_id: job.round_id,
                kind: job.kind,
                amount: job.credit(),
                balance_after: response.amount,
                txd: Some(request.txd.clone()),
            })
            .await?;
            Self::record_stats(txn.as_mut(), job, user).await
        }
        .await;
        match recorded {
            Ok(()) => txn.commit().await.map_err(JobError::permanent)?,
            Err(err) => {
                txn.rollback().await;
                tracing::error!(
                    target: LOG_TARGET,
                    job_key = key,
                    txd = %request.txd,
                    error = %err,
                    "external wallet credited but ledger record failed"
                );
                return Err(JobError::permanent(err));
            }
        }
        Ok(Applied::Credited {
            balance: response.amount,
        })
    }

    async fn record_stats(
        txn: &mut (dyn LedgerTxn + Send),
        job: &SettlementJob,
        user: &UserRecord,
    ) -> Result<(), StorageError> {
        if user.user_type != UserType::Player || !job.is_scoring() {
            return Ok(());
        }
        let today = Local::now().date_naive();
        let mut stats = txn
            .load_stats(user.id)
            .await?
            .unwrap_or_else(|| UserStats::empty(user.id, today));
        stats.record(today, job.kind, job.rolling_change, job.change);
        txn.save_stats(&stats).await
    }
}

#[async_trait]
impl JobHandler for SettlementProcessor {
    async fn handle(&self, job: &JobRecord) -> Result<(), JobError> {
        let settlement: SettlementJob = job.decode()?;
        self.apply(&settlement).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use crate::wallet::{WalletApiError, ERROR_INSUFFICIENT_BALANCE};
    use rust_decimal_macros::dec;

    fn job(kind: SettlementKind, user_id: UserId, change: Decimal, refund: Decimal) -> SettlementJob {
        SettlementJob {
            kind,
            table_id: 1,
            round_id: 10,
            round_sn: "B01-20240101-001".into(),
            game_type: GameType::Baccarat,
            order_id: 100,
            user_id,
            bet_amount: dec!(10),
            change,
            stake_refund: refund,
            rolling_change: dec!(10),
            revision: 0,
            bets: [(1, dec!(10))].into_iter().collect(),
            hit_result: None,
        }
    }

    #[test]
    fn job_keys_separate_kinds_and_resettle_revisions() {
        let mut job = job(SettlementKind::Settle, 1, dec!(9.5), dec!(10));
        assert_eq!(job.job_key(), "settle:1:100");
        job.kind = SettlementKind::Resettle;
        job.revision = 1;
        assert_eq!(job.job_key(), "resettle:1:100");
        job.revision = 3;
        assert_eq!(job.job_key(), "resettle:1:100:3");
        job.kind = SettlementKind::Cancel;
        assert_eq!(job.job_key(), "cancel:1:100");
    }

    #[tokio::test]
    async fn replaying_a_job_credits_once() -> anyhow::Result<()> {
        let harness = Harness::new();
        let user = harness
            .create_user("alice", dec!(90), WalletMode::Internal)
            .await?;
        let job = job(SettlementKind::Settle, user.id, dec!(9.5), dec!(10));

        assert_eq!(
            harness.processor.apply(&job).await?,
            Applied::Credited { balance: dec!(109.5) }
        );
        assert_eq!(harness.processor.apply(&job).await?, Applied::Skipped);
        assert_eq!(harness.balance(user.id).await?, dec!(109.5));

        // The marker expired or was lost: the transaction row still guards.
        harness
            .store
            .del(&applied_marker_key(&job.job_key()))
            .await?;
        assert_eq!(harness.processor.apply(&job).await?, Applied::Skipped);
        assert_eq!(harness.balance(user.id).await?, dec!(109.5));
        assert_eq!(
            harness.broadcast.count(EVENT_BALANCE_CHANGED),
            1,
            "only the first delivery notifies"
        );
        Ok(())
    }

    #[tokio::test]
    async fn player_stats_follow_scoring_events() -> anyhow::Result<()> {
        let harness = Harness::new();
        let user = harness
            .create_user("bob", dec!(0), WalletMode::Internal)
            .await?;
        harness
            .processor
            .apply(&job(SettlementKind::Settle, user.id, dec!(9.5), dec!(10)))
            .await?;
        let stats = harness.stats(user.id).await?.expect("stats");
        assert_eq!(stats.total_rolling, dec!(10));
        assert_eq!(stats.total_win_lose, dec!(9.5));
        assert_eq!(stats.win_streak, 1);
        Ok(())
    }

    #[tokio::test]
    async fn external_wallet_is_called_once_with_fresh_token() -> anyhow::Result<()> {
        let harness = Harness::new();
        let user = harness
            .create_user("carol", dec!(0), WalletMode::External)
            .await?;
        harness.wallet.set_balance("carol", dec!(500));

        let job = job(SettlementKind::Settle, user.id, dec!(-10), dec!(10));
        let applied = harness.processor.apply(&job).await?;
        assert_eq!(applied, Applied::Credited { balance: dec!(500) });
        assert_eq!(harness.processor.apply(&job).await?, Applied::Skipped);

        let calls = harness.wallet.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "settle");
        assert_eq!(calls[0].1.amount, dec!(0));
        assert!(!calls[0].1.txd.is_empty());
        // The local mirror follows the upstream balance.
        assert_eq!(harness.balance(user.id).await?, dec!(500));
        Ok(())
    }

    #[tokio::test]
    async fn wallet_rejections_are_permanent_and_timeouts_retry() -> anyhow::Result<()> {
        let harness = Harness::new();
        let user = harness
            .create_user("dave", dec!(0), WalletMode::External)
            .await?;
        let job = job(SettlementKind::Resettle, user.id, dec!(-20), dec!(0));

        harness.wallet.fail_next(WalletApiError::Rejected {
            code: ERROR_INSUFFICIENT_BALANCE,
        });
        assert!(matches!(
            harness.processor.apply(&job).await,
            Err(JobError::Permanent(_))
        ));

        harness
            .wallet
            .fail_next(WalletApiError::Upstream { code: 9999 });
        assert!(matches!(
            harness.processor.apply(&job).await,
            Err(JobError::Retryable(_))
        ));

        assert!(matches!(
            harness.processor.apply(&job).await?,
            Applied::Credited { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_permanent() -> anyhow::Result<()> {
        let harness = Harness::new();
        let job = job(SettlementKind::Settle, 404, dec!(1), dec!(0));
        assert!(matches!(
            harness.processor.apply(&job).await,
            Err(JobError::Permanent(_))
        ));
        Ok(())
    }
}
