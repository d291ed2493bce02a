use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::ActiveValue::{Set, Unchanged};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::entity::{
    bet_orders, live_tables, rounds, settlement_outbox, temp_bet_orders, user_stats, users,
    wallet_transactions,
};
use crate::game::{BetMap, GameType};
use crate::ledger::error::StorageError;
use crate::ledger::types::{
    BetOrder, DealerRef, NewRound, NewTable, NewTempOrder, NewUser, NewWalletTransaction,
    OrderId, OrderStatus, OutboxEntry, RoundId, RoundRecord, RoundStatus, SettlementKind, TableId,
    TableRecord, TempOrder, UserId, UserRecord, UserStats, UserType, WalletMode,
    WalletTransaction,
};

use super::{LedgerStorage, LedgerTxn};

const LOG_TARGET: &str = "ledger::storage::sea_orm";

pub struct SeaOrmLedgerStorage {
    connection: DatabaseConnection,
}

impl SeaOrmLedgerStorage {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

pub struct SeaOrmLedgerTxn {
    txn: DatabaseTransaction,
}

#[async_trait]
impl LedgerStorage for SeaOrmLedgerStorage {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn + Send>, StorageError> {
        let txn = self.connection.begin().await?;
        Ok(Box::new(SeaOrmLedgerTxn { txn }))
    }
}

fn to_json<T: Serialize>(column: &'static str, value: &T) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(value).map_err(|err| StorageError::corrupt(column, err))
}

fn from_json<T: DeserializeOwned>(
    column: &'static str,
    value: serde_json::Value,
) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|err| StorageError::corrupt(column, err))
}

fn game_type(code: i16) -> Result<GameType, StorageError> {
    GameType::from_code(code).ok_or_else(|| StorageError::corrupt("game_type", code))
}

fn user_type(code: i16) -> Result<UserType, StorageError> {
    UserType::from_code(code).ok_or_else(|| StorageError::corrupt("user_type", code))
}

fn to_i32(column: &'static str, value: u32) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::validation(format!("{column} overflow")))
}

fn to_u32(column: &'static str, value: i32) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|err| StorageError::corrupt(column, err))
}

fn table_from_model(model: live_tables::Model) -> Result<TableRecord, StorageError> {
    let dealer = match (model.dealer_id, model.dealer_name) {
        (Some(id), Some(name)) => Some(DealerRef { id, name }),
        _ => None,
    };
    Ok(TableRecord {
        id: model.id,
        lobby_no: model.lobby_no,
        table_no: model.table_no,
        game_type: game_type(model.game_type)?,
        countdown_secs: to_u32("countdown_secs", model.countdown_secs)?,
        current_shoe: model.current_shoe,
        maintain: model.maintain,
        dealer,
    })
}

fn round_from_model(model: rounds::Model) -> Result<RoundRecord, StorageError> {
    Ok(RoundRecord {
        id: model.id,
        table_id: model.table_id,
        lobby_no: model.lobby_no,
        table_no: model.table_no,
        game_type: game_type(model.game_type)?,
        shoe_no: model.shoe_no,
        round_no: to_u32("round_no", model.round_no)?,
        round_sn: model.round_sn,
        dealer: model.dealer,
        status: RoundStatus::from_code(model.status)
            .ok_or_else(|| StorageError::corrupt("rounds.status", model.status))?,
        result: model.result.map(|v| from_json("rounds.result", v)).transpose()?,
        details: model.details,
        start_time: model.start_time,
        end_time: model.end_time,
        settle_time: model.settle_time,
        resettle_count: to_u32("resettle_count", model.resettle_count)?,
    })
}

fn temp_from_model(model: temp_bet_orders::Model) -> Result<TempOrder, StorageError> {
    Ok(TempOrder {
        id: model.id,
        round_id: model.round_id,
        table_id: model.table_id,
        user_id: model.user_id,
        bets: from_json::<BetMap>("temp_bet_orders.bet", model.bet)?,
        bet_amount: model.bet_amount,
        currency: model.currency,
        bet_time: model.bet_time,
        source: model.source,
        ip: model.ip,
        user_type: user_type(model.user_type)?,
    })
}

fn bet_order_from_model(model: bet_orders::Model) -> Result<BetOrder, StorageError> {
    Ok(BetOrder {
        id: model.id,
        round_id: model.round_id,
        table_id: model.table_id,
        user_id: model.user_id,
        game_type: game_type(model.game_type)?,
        round_sn: model.round_sn,
        bets: from_json("bet_orders.bet", model.bet)?,
        bet_amount: model.bet_amount,
        currency: model.currency,
        rolling: model.rolling,
        comm: model.comm,
        round_result: model
            .round_result
            .map(|v| from_json("bet_orders.round_result", v))
            .transpose()?,
        round_details: model.round_details,
        settle_result: model.settle_result,
        status: OrderStatus::from_code(model.status)
            .ok_or_else(|| StorageError::corrupt("bet_orders.status", model.status))?,
        resettle_count: to_u32("resettle_count", model.resettle_count)?,
        bet_time: model.bet_time,
        settle_time: model.settle_time,
        user_type: user_type(model.user_type)?,
    })
}

fn bet_order_active(order: &BetOrder) -> Result<bet_orders::ActiveModel, StorageError> {
    Ok(bet_orders::ActiveModel {
        id: Set(order.id),
        round_id: Set(order.round_id),
        table_id: Set(order.table_id),
        user_id: Set(order.user_id),
        game_type: Set(order.game_type.code()),
        round_sn: Set(order.round_sn.clone()),
        bet: Set(to_json("bet_orders.bet", &order.bets)?),
        bet_amount: Set(order.bet_amount),
        currency: Set(order.currency.clone()),
        rolling: Set(order.rolling),
        comm: Set(order.comm),
        round_result: Set(order
            .round_result
            .as_ref()
            .map(|hits| to_json("bet_orders.round_result", hits))
            .transpose()?),
        round_details: Set(order.round_details.clone()),
        settle_result: Set(order.settle_result),
        status: Set(order.status.code()),
        resettle_count: Set(to_i32("resettle_count", order.resettle_count)?),
        bet_time: Set(order.bet_time),
        settle_time: Set(order.settle_time),
        user_type: Set(order.user_type.code()),
    })
}

fn user_from_model(model: users::Model) -> Result<UserRecord, StorageError> {
    Ok(UserRecord {
        id: model.id,
        username: model.username,
        currency: model.currency,
        balance: model.balance,
        wallet_mode: WalletMode::from_code(model.wallet_mode)
            .ok_or_else(|| StorageError::corrupt("users.wallet_mode", model.wallet_mode))?,
        user_type: user_type(model.user_type)?,
        comm_rate: model.comm_rate,
    })
}

fn transaction_from_model(
    model: wallet_transactions::Model,
) -> Result<WalletTransaction, StorageError> {
    Ok(WalletTransaction {
        id: model.id,
        idempotency_key: model.idempotency_key,
        user_id: model.user_id,
        order_id: model.order_id,
        round_id: model.round_id,
        kind: SettlementKind::from_code(model.kind)
            .ok_or_else(|| StorageError::corrupt("wallet_transactions.kind", model.kind))?,
        amount: model.amount,
        balance_after: model.balance_after,
        txd: model.txd,
        created_at: model.created_at,
    })
}

#[async_trait]
impl LedgerTxn for SeaOrmLedgerTxn {
    async fn insert_table(&mut self, table: NewTable) -> Result<TableRecord, StorageError> {
        let (dealer_id, dealer_name) = match table.dealer {
            Some(dealer) => (Some(dealer.id), Some(dealer.name)),
            None => (None, None),
        };
        let model = live_tables::ActiveModel {
            lobby_no: Set(table.lobby_no),
            table_no: Set(table.table_no),
            game_type: Set(table.game_type.code()),
            countdown_secs: Set(to_i32("countdown_secs", table.countdown_secs)?),
            current_shoe: Set(table.current_shoe),
            maintain: Set(false),
            dealer_id: Set(dealer_id),
            dealer_name: Set(dealer_name),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        table_from_model(inserted)
    }

    async fn load_table(&mut self, id: TableId) -> Result<Option<TableRecord>, StorageError> {
        live_tables::Entity::find_by_id(id)
            .one(&self.txn)
            .await?
            .map(table_from_model)
            .transpose()
    }

    async fn update_table_shoe(&mut self, id: TableId, shoe_no: i64) -> Result<(), StorageError> {
        let result = live_tables::Entity::update_many()
            .col_expr(live_tables::Column::CurrentShoe, Expr::value(shoe_no))
            .filter(live_tables::Column::Id.eq(id))
            .exec(&self.txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound("table"));
        }
        Ok(())
    }

    async fn insert_round(&mut self, round: NewRound) -> Result<RoundRecord, StorageError> {
        let model = rounds::ActiveModel {
            table_id: Set(round.table_id),
            lobby_no: Set(round.lobby_no),
            table_no: Set(round.table_no),
            game_type: Set(round.game_type.code()),
            shoe_no: Set(round.shoe_no),
            round_no: Set(to_i32("round_no", round.round_no)?),
            round_sn: Set(round.round_sn),
            dealer: Set(round.dealer),
            status: Set(RoundStatus::Betting.code()),
            result: Set(None),
            details: Set(None),
            start_time: Set(round.start_time),
            end_time: Set(round.end_time),
            settle_time: Set(None),
            resettle_count: Set(0),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        round_from_model(inserted)
    }

    async fn load_round(&mut self, id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        rounds::Entity::find_by_id(id)
            .lock_exclusive()
            .one(&self.txn)
            .await?
            .map(round_from_model)
            .transpose()
    }

    async fn latest_round(
        &mut self,
        table_id: TableId,
    ) -> Result<Option<RoundRecord>, StorageError> {
        rounds::Entity::find()
            .filter(rounds::Column::TableId.eq(table_id))
            .order_by_desc(rounds::Column::Id)
            .one(&self.txn)
            .await?
            .map(round_from_model)
            .transpose()
    }

    async fn update_round(
        &mut self,
        round: &RoundRecord,
        expected: RoundStatus,
    ) -> Result<(), StorageError> {
        let result = round
            .result
            .as_ref()
            .map(|hits| to_json("rounds.result", hits))
            .transpose()?;
        let updated = rounds::Entity::update_many()
            .col_expr(rounds::Column::Status, Expr::value(round.status.code()))
            .col_expr(rounds::Column::Result, Expr::value(result))
            .col_expr(rounds::Column::Details, Expr::value(round.details.clone()))
            .col_expr(rounds::Column::EndTime, Expr::value(round.end_time))
            .col_expr(rounds::Column::SettleTime, Expr::value(round.settle_time))
            .col_expr(
                rounds::Column::ResettleCount,
                Expr::value(to_i32("resettle_count", round.resettle_count)?),
            )
            .filter(rounds::Column::Id.eq(round.id))
            .filter(rounds::Column::Status.eq(expected.code()))
            .exec(&self.txn)
            .await?;
        if updated.rows_affected == 0 {
            tracing::warn!(
                target: LOG_TARGET,
                round_id = round.id,
                expected = ?expected,
                next = ?round.status,
                "round status changed underneath the update"
            );
            return Err(StorageError::Conflict("round"));
        }
        Ok(())
    }

    async fn insert_temp_order(&mut self, order: NewTempOrder) -> Result<TempOrder, StorageError> {
        if order.bets.is_empty() || order.bets.values().any(|amount| *amount <= Decimal::ZERO) {
            return Err(StorageError::validation(
                "temp order needs at least one positive wager leg",
            ));
        }
        let bet_amount: Decimal = order.bets.values().copied().sum();
        let model = temp_bet_orders::ActiveModel {
            round_id: Set(order.round_id),
            table_id: Set(order.table_id),
            user_id: Set(order.user_id),
            bet: Set(to_json("temp_bet_orders.bet", &order.bets)?),
            bet_amount: Set(bet_amount),
            currency: Set(order.currency),
            bet_time: Set(Utc::now()),
            source: Set(order.source),
            ip: Set(order.ip),
            user_type: Set(order.user_type.code()),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        temp_from_model(inserted)
    }

    async fn temp_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<TempOrder>, StorageError> {
        temp_bet_orders::Entity::find()
            .filter(temp_bet_orders::Column::RoundId.eq(round_id))
            .order_by_asc(temp_bet_orders::Column::Id)
            .all(&self.txn)
            .await?
            .into_iter()
            .map(temp_from_model)
            .collect()
    }

    async fn delete_temp_order(&mut self, id: OrderId) -> Result<(), StorageError> {
        temp_bet_orders::Entity::delete_by_id(id)
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn insert_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError> {
        bet_orders::Entity::insert(bet_order_active(order)?)
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn update_bet_order(&mut self, order: &BetOrder) -> Result<(), StorageError> {
        let mut model = bet_order_active(order)?;
        model.id = Unchanged(order.id);
        model.update(&self.txn).await?;
        Ok(())
    }

    async fn load_bet_order(&mut self, id: OrderId) -> Result<Option<BetOrder>, StorageError> {
        bet_orders::Entity::find_by_id(id)
            .one(&self.txn)
            .await?
            .map(bet_order_from_model)
            .transpose()
    }

    async fn bet_orders_for_round(
        &mut self,
        round_id: RoundId,
    ) -> Result<Vec<BetOrder>, StorageError> {
        bet_orders::Entity::find()
            .filter(bet_orders::Column::RoundId.eq(round_id))
            .order_by_asc(bet_orders::Column::Id)
            .all(&self.txn)
            .await?
            .into_iter()
            .map(bet_order_from_model)
            .collect()
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<UserRecord, StorageError> {
        let model = users::ActiveModel {
            username: Set(user.username),
            currency: Set(user.currency),
            balance: Set(user.balance),
            wallet_mode: Set(user.wallet_mode.code()),
            user_type: Set(user.user_type.code()),
            comm_rate: Set(user.comm_rate),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        user_from_model(inserted)
    }

    async fn load_user(&mut self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        users::Entity::find_by_id(id)
            .one(&self.txn)
            .await?
            .map(user_from_model)
            .transpose()
    }

    async fn adjust_balance(
        &mut self,
        id: UserId,
        delta: Decimal,
    ) -> Result<Decimal, StorageError> {
        let result = users::Entity::update_many()
            .col_expr(
                users::Column::Balance,
                Expr::col(users::Column::Balance).add(delta),
            )
            .filter(users::Column::Id.eq(id))
            .exec(&self.txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound("user"));
        }
        let user = users::Entity::find_by_id(id)
            .one(&self.txn)
            .await?
            .ok_or(StorageError::NotFound("user"))?;
        Ok(user.balance)
    }

    async fn set_balance(&mut self, id: UserId, balance: Decimal) -> Result<(), StorageError> {
        let result = users::Entity::update_many()
            .col_expr(users::Column::Balance, Expr::value(balance))
            .filter(users::Column::Id.eq(id))
            .exec(&self.txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound("user"));
        }
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<WalletTransaction>, StorageError> {
        wallet_transactions::Entity::find()
            .filter(wallet_transactions::Column::IdempotencyKey.eq(idempotency_key))
            .one(&self.txn)
            .await?
            .map(transaction_from_model)
            .transpose()
    }

    async fn insert_transaction(
        &mut self,
        tx: NewWalletTransaction,
    ) -> Result<WalletTransaction, StorageError> {
        let model = wallet_transactions::ActiveModel {
            idempotency_key: Set(tx.idempotency_key),
            user_id: Set(tx.user_id),
            order_id: Set(tx.order_id),
            round_id: Set(tx.round_id),
            kind: Set(tx.kind.code()),
            amount: Set(tx.amount),
            balance_after: Set(tx.balance_after),
            txd: Set(tx.txd),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        transaction_from_model(inserted)
    }

    async fn load_stats(&mut self, user_id: UserId) -> Result<Option<UserStats>, StorageError> {
        Ok(user_stats::Entity::find_by_id(user_id)
            .one(&self.txn)
            .await?
            .map(|model| UserStats {
                user_id: model.user_id,
                stats_date: model.stats_date,
                today_rolling: model.today_rolling,
                total_rolling: model.total_rolling,
                today_win_lose: model.today_win_lose,
                total_win_lose: model.total_win_lose,
                win_streak: model.win_streak,
            }))
    }

    async fn save_stats(&mut self, stats: &UserStats) -> Result<(), StorageError> {
        let model = user_stats::ActiveModel {
            user_id: Set(stats.user_id),
            stats_date: Set(stats.stats_date),
            today_rolling: Set(stats.today_rolling),
            total_rolling: Set(stats.total_rolling),
            today_win_lose: Set(stats.today_win_lose),
            total_win_lose: Set(stats.total_win_lose),
            win_streak: Set(stats.win_streak),
        };
        user_stats::Entity::insert(model)
            .on_conflict(
                OnConflict::column(user_stats::Column::UserId)
                    .update_columns([
                        user_stats::Column::StatsDate,
                        user_stats::Column::TodayRolling,
                        user_stats::Column::TotalRolling,
                        user_stats::Column::TodayWinLose,
                        user_stats::Column::TotalWinLose,
                        user_stats::Column::WinStreak,
                    ])
                    .to_owned(),
            )
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn stage_job(
        &mut self,
        job_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), StorageError> {
        let model = settlement_outbox::ActiveModel {
            job_key: Set(job_key.to_string()),
            payload: Set(payload),
            created_at: Set(Utc::now()),
        };
        settlement_outbox::Entity::insert(model)
            .on_conflict(
                OnConflict::column(settlement_outbox::Column::JobKey)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn staged_jobs(&mut self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError> {
        Ok(settlement_outbox::Entity::find()
            .order_by_asc(settlement_outbox::Column::CreatedAt)
            .order_by_asc(settlement_outbox::Column::JobKey)
            .limit(limit as u64)
            .all(&self.txn)
            .await?
            .into_iter()
            .map(|model| OutboxEntry {
                job_key: model.job_key,
                payload: model.payload,
                created_at: model.created_at,
            })
            .collect())
    }

    async fn unstage_job(&mut self, job_key: &str) -> Result<(), StorageError> {
        settlement_outbox::Entity::delete_by_id(job_key.to_string())
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        if let Err(err) = self.txn.rollback().await {
            tracing::warn!(target: LOG_TARGET, error = %err, "ledger rollback failed");
        }
    }
}
