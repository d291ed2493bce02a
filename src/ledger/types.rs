use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::{BetMap, GameType, HitResult};

pub type TableId = i64;
pub type RoundId = i64;
pub type OrderId = i64;
pub type UserId = i64;

/// Durable round status. The numeric code is what clients see as `playStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum RoundStatus {
    Betting,
    Dealing,
    Over,
    Cancel,
    Resettle,
}

impl RoundStatus {
    pub fn code(self) -> i16 {
        match self {
            RoundStatus::Betting => 1,
            RoundStatus::Dealing => 2,
            RoundStatus::Over => 3,
            RoundStatus::Cancel => 4,
            RoundStatus::Resettle => 5,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(RoundStatus::Betting),
            2 => Some(RoundStatus::Dealing),
            3 => Some(RoundStatus::Over),
            4 => Some(RoundStatus::Cancel),
            5 => Some(RoundStatus::Resettle),
            _ => None,
        }
    }

    /// Betting or Dealing: a round is in flight and the table is busy.
    pub fn is_open(self) -> bool {
        matches!(self, RoundStatus::Betting | RoundStatus::Dealing)
    }

    /// Whether the round state machine permits moving from `self` to `next`.
    pub fn can_transition(self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Betting, Dealing)
                | (Betting, Over)
                | (Dealing, Over)
                | (Over, Resettle)
                | (Resettle, Resettle)
                | (Dealing, Cancel)
                | (Over, Cancel)
                | (Resettle, Cancel)
        )
    }
}

impl From<RoundStatus> for i16 {
    fn from(status: RoundStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i16> for RoundStatus {
    type Error = String;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        RoundStatus::from_code(code).ok_or_else(|| format!("unknown round status {code}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Settled,
    Resettled,
    Cancel,
}

impl OrderStatus {
    pub fn code(self) -> i16 {
        match self {
            OrderStatus::Settled => 1,
            OrderStatus::Resettled => 2,
            OrderStatus::Cancel => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(OrderStatus::Settled),
            2 => Some(OrderStatus::Resettled),
            3 => Some(OrderStatus::Cancel),
            _ => None,
        }
    }
}

/// Who custodies a user's balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletMode {
    /// Balance lives in the `users` table.
    Internal,
    /// Balance lives with an upstream operator reached through the wallet API.
    External,
}

impl WalletMode {
    pub fn code(self) -> i16 {
        match self {
            WalletMode::Internal => 1,
            WalletMode::External => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(WalletMode::Internal),
            2 => Some(WalletMode::External),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Player,
    /// Demo accounts: money moves, statistics do not.
    Trial,
}

impl UserType {
    pub fn code(self) -> i16 {
        match self {
            UserType::Player => 1,
            UserType::Trial => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(UserType::Player),
            2 => Some(UserType::Trial),
            _ => None,
        }
    }
}

/// Money-moving operation applied to one order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Settle,
    Resettle,
    Cancel,
}

impl SettlementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementKind::Settle => "settle",
            SettlementKind::Resettle => "resettle",
            SettlementKind::Cancel => "cancel",
        }
    }

    pub fn code(self) -> i16 {
        match self {
            SettlementKind::Settle => 1,
            SettlementKind::Resettle => 2,
            SettlementKind::Cancel => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(SettlementKind::Settle),
            2 => Some(SettlementKind::Resettle),
            3 => Some(SettlementKind::Cancel),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerRef {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct TableRecord {
    pub id: TableId,
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: GameType,
    pub countdown_secs: u32,
    pub current_shoe: i64,
    pub maintain: bool,
    pub dealer: Option<DealerRef>,
}

#[derive(Clone, Debug)]
pub struct NewTable {
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: GameType,
    pub countdown_secs: u32,
    pub current_shoe: i64,
    pub dealer: Option<DealerRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundRecord {
    pub id: RoundId,
    pub table_id: TableId,
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: GameType,
    pub shoe_no: i64,
    pub round_no: u32,
    pub round_sn: String,
    pub dealer: Option<String>,
    pub status: RoundStatus,
    pub result: Option<HitResult>,
    pub details: Option<Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub settle_time: Option<DateTime<Utc>>,
    pub resettle_count: u32,
}

#[derive(Clone, Debug)]
pub struct NewRound {
    pub table_id: TableId,
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: GameType,
    pub shoe_no: i64,
    pub round_no: u32,
    pub round_sn: String,
    pub dealer: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Wager recorded during the betting window, not yet scored.
#[derive(Clone, Debug, PartialEq)]
pub struct TempOrder {
    pub id: OrderId,
    pub round_id: RoundId,
    pub table_id: TableId,
    pub user_id: UserId,
    pub bets: BetMap,
    pub bet_amount: Decimal,
    pub currency: String,
    pub bet_time: DateTime<Utc>,
    pub source: Option<String>,
    pub ip: Option<String>,
    pub user_type: UserType,
}

#[derive(Clone, Debug)]
pub struct NewTempOrder {
    pub round_id: RoundId,
    pub table_id: TableId,
    pub user_id: UserId,
    pub bets: BetMap,
    pub currency: String,
    pub source: Option<String>,
    pub ip: Option<String>,
    pub user_type: UserType,
}

/// Scored order. Shares its id with the temp order it was folded from.
#[derive(Clone, Debug, PartialEq)]
pub struct BetOrder {
    pub id: OrderId,
    pub round_id: RoundId,
    pub table_id: TableId,
    pub user_id: UserId,
    pub game_type: GameType,
    pub round_sn: String,
    pub bets: BetMap,
    pub bet_amount: Decimal,
    pub currency: String,
    pub rolling: Decimal,
    pub comm: Decimal,
    pub round_result: Option<HitResult>,
    pub round_details: Option<Value>,
    pub settle_result: Decimal,
    pub status: OrderStatus,
    pub resettle_count: u32,
    pub bet_time: DateTime<Utc>,
    pub settle_time: DateTime<Utc>,
    pub user_type: UserType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub currency: String,
    pub balance: Decimal,
    pub wallet_mode: WalletMode,
    pub user_type: UserType,
    pub comm_rate: Decimal,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub currency: String,
    pub balance: Decimal,
    pub wallet_mode: WalletMode,
    pub user_type: UserType,
    pub comm_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WalletTransaction {
    pub id: i64,
    pub idempotency_key: String,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub round_id: RoundId,
    pub kind: SettlementKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub txd: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewWalletTransaction {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub round_id: RoundId,
    pub kind: SettlementKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub txd: Option<String>,
}

/// A settlement job staged in the same transaction as the writes that
/// produced it, waiting to be handed to the job queue.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub job_key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserStats {
    pub user_id: UserId,
    pub stats_date: NaiveDate,
    pub today_rolling: Decimal,
    pub total_rolling: Decimal,
    pub today_win_lose: Decimal,
    pub total_win_lose: Decimal,
    pub win_streak: i32,
}

impl UserStats {
    pub fn empty(user_id: UserId, today: NaiveDate) -> Self {
        Self {
            user_id,
            stats_date: today,
            today_rolling: Decimal::ZERO,
            total_rolling: Decimal::ZERO,
            today_win_lose: Decimal::ZERO,
            total_win_lose: Decimal::ZERO,
            win_streak: 0,
        }
    }

    /// Fold one scoring event into the counters. Only fresh settles move the
    /// win streak; corrections adjust the amounts alone.
    pub fn record(
        &mut self,
        today: NaiveDate,
        kind: SettlementKind,
        rolling: Decimal,
        win_lose: Decimal,
    ) {
        if self.stats_date != today {
            self.stats_date = today;
            self.today_rolling = Decimal::ZERO;
            self.today_win_lose = Decimal::ZERO;
        }
        self.today_rolling += rolling;
        self.total_rolling += rolling;
        self.today_win_lose += win_lose;
        self.total_win_lose += win_lose;

        if kind == SettlementKind::Settle {
            if win_lose > Decimal::ZERO {
                self.win_streak += 1;
            } else if win_lose < Decimal::ZERO {
                self.win_streak = 0;
            }
        }
    }
}
