use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::{BetCode, GameType, HitResult};
use crate::ledger::{DealerRef, RoundId, RoundRecord, RoundStatus, TableId, TableRecord, TempOrder};

/// Read-optimized projection of "what is happening now" at a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableState {
    pub table_id: TableId,
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: GameType,
    pub current_shoe: i64,
    pub current_round_no: u32,
    pub current_round_id: Option<RoundId>,
    /// Round status code, or [`TableState::IDLE`] when no round of the
    /// current shoe exists.
    pub play_status: i16,
    pub round_end_time: Option<DateTime<Utc>>,
    pub dealer: Option<DealerRef>,
    pub maintain: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub good_road: bool,
}

impl TableState {
    pub const IDLE: i16 = -1;

    /// Rebuild the projection from durable rows. A latest round belonging to
    /// an earlier shoe does not count as the current round.
    pub fn derive(table: &TableRecord, latest: Option<&RoundRecord>) -> Self {
        let current = latest.filter(|round| round.shoe_no == table.current_shoe);
        Self {
            table_id: table.id,
            lobby_no: table.lobby_no,
            table_no: table.table_no.clone(),
            game_type: table.game_type,
            current_shoe: table.current_shoe,
            current_round_no: current.map(|round| round.round_no).unwrap_or(0),
            current_round_id: current.map(|round| round.id),
            play_status: current
                .map(|round| round.status.code())
                .unwrap_or(Self::IDLE),
            round_end_time: current.map(|round| round.end_time),
            dealer: table.dealer.clone(),
            maintain: table.maintain,
            shuffle: false,
            good_road: false,
        }
    }

    pub fn status(&self) -> Option<RoundStatus> {
        RoundStatus::from_code(self.play_status)
    }

    /// A round of this table is betting or dealing.
    pub fn is_busy(&self) -> bool {
        self.status().map(RoundStatus::is_open).unwrap_or(false)
    }

    /// Point the projection at a round and mirror its status.
    pub fn track(&mut self, round: &RoundRecord) {
        self.current_shoe = round.shoe_no;
        self.current_round_no = round.round_no;
        self.current_round_id = Some(round.id);
        self.play_status = round.status.code();
        self.round_end_time = Some(round.end_time);
    }
}

/// Dealer-supplied outcome for settle and resettle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub table_id: TableId,
    pub round_id: RoundId,
    pub game_type: GameType,
    /// Hit codes as reported by the dealer. Ignored when `details` is present.
    #[serde(default)]
    pub result: Option<Vec<BetCode>>,
    /// Raw cards or dice; the hit result is recomputed from these.
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStarted {
    pub table_id: TableId,
    pub round_id: RoundId,
    pub shoe_no: i64,
    pub round_no: u32,
    pub round_sn: String,
    pub end_time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleSummary {
    pub table_id: TableId,
    pub round_id: RoundId,
    pub round_sn: String,
    pub status: RoundStatus,
    pub result: HitResult,
    pub orders: usize,
    pub jobs: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSummary {
    pub table_id: TableId,
    pub round_id: RoundId,
    pub previous_status: RoundStatus,
    pub orders: usize,
    pub jobs: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleSummary {
    pub table_id: TableId,
    pub previous_shoe: i64,
    pub shoe_no: i64,
    pub history_cleared: bool,
}

/// Per-bet-code totals of one round's temp orders.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetVolume {
    pub round_id: RoundId,
    pub amounts: BTreeMap<BetCode, Decimal>,
    pub players: BTreeMap<BetCode, usize>,
    pub total_amount: Decimal,
    pub player_count: usize,
}

impl BetVolume {
    pub fn from_orders(round_id: RoundId, orders: &[TempOrder]) -> Self {
        let mut volume = BetVolume {
            round_id,
            ..Default::default()
        };
        let mut users = BTreeSet::new();
        for order in orders {
            users.insert(order.user_id);
            for (code, amount) in &order.bets {
                *volume.amounts.entry(*code).or_default() += *amount;
                *volume.players.entry(*code).or_default() += 1;
                volume.total_amount += *amount;
            }
        }
        volume.player_count = users.len();
        volume
    }
}
