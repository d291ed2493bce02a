//! Recent-round history per table.
//!
//! Card-shoe games keep every round of the current shoe. Other games keep a
//! rotating window: once the cap is reached the oldest entry is popped before
//! the newest is pushed, so list indices keep addressing the same rounds and
//! resettle or cancel can patch an entry in place.
//!
//! Roulette tables also maintain two hashes over the visible window: the hit
//! frequency of every number and red/black/odd/even/zero counts. They follow
//! every append, eviction and patch incrementally.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::roulette::{self, Roulette};
use crate::game::{GameType, HitResult};
use crate::ledger::{RoundId, RoundStatus, TableId};

use super::{decode, CacheError, KeyValueStore};

const LOG_TARGET: &str = "cache::history";

const RED: &str = "red";
const BLACK: &str = "black";
const ODD: &str = "odd";
const EVEN: &str = "even";
const ZERO: &str = "zero";
const TOTAL: &str = "total";

pub fn history_key(table_id: TableId) -> String {
    format!("table:{table_id}:history")
}

fn ranking_key(table_id: TableId) -> String {
    format!("table:{table_id}:roulette:ranking")
}

fn stats_key(table_id: TableId) -> String {
    format!("table:{table_id}:roulette:stats")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub round_id: RoundId,
    pub round_no: u32,
    pub shoe_no: i64,
    pub round_sn: String,
    pub status: RoundStatus,
    pub result: HitResult,
    #[serde(default)]
    pub details: Option<Value>,
    pub settle_time: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Winning roulette number, unless the round was cancelled.
    fn counted_number(&self) -> Option<u8> {
        if self.status == RoundStatus::Cancel {
            return None;
        }
        Roulette::winning_number(&self.result)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouletteStats {
    /// `(number, hits)` ordered hottest first, ties by number.
    pub ranking: Vec<(u8, i64)>,
    pub total: i64,
    pub red: i64,
    pub black: i64,
    pub odd: i64,
    pub even: i64,
    pub zero: i64,
}

impl RouletteStats {
    /// Share of the counted rounds, in percent with two decimals.
    pub fn percent(&self, count: i64) -> Decimal {
        if self.total == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(count) * Decimal::ONE_HUNDRED / Decimal::from(self.total)).round_dp(2)
    }
}

#[derive(Clone)]
pub struct RoundHistoryCache {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl RoundHistoryCache {
    pub fn new(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    pub async fn entries(&self, table_id: TableId) -> Result<Vec<HistoryEntry>, CacheError> {
        let key = history_key(table_id);
        self.store
            .lrange(&key, 0, -1)
            .await?
            .iter()
            .map(|raw| decode(&key, raw))
            .collect()
    }

    pub async fn len(&self, table_id: TableId) -> Result<usize, CacheError> {
        self.store.llen(&history_key(table_id)).await
    }

    pub async fn append(
        &self,
        table_id: TableId,
        game: GameType,
        entry: &HistoryEntry,
    ) -> Result<(), CacheError> {
        let key = history_key(table_id);
        if !game.is_shoe_game() {
            while self.store.llen(&key).await? >= self.cap {
                let Some(raw) = self.store.lpop(&key).await? else {
                    break;
                };
                let evicted: HistoryEntry = decode(&key, &raw)?;
                if game == GameType::Roulette {
                    self.count_number(table_id, evicted.counted_number(), -1)
                        .await?;
                }
            }
        }
        self.store
            .rpush(&key, &serde_json::to_string(entry)?)
            .await?;
        if game == GameType::Roulette {
            self.count_number(table_id, entry.counted_number(), 1).await?;
        }
        Ok(())
    }

    /// Replace the entry of `entry.round_id` if it is still visible.
    /// Returns whether an entry was patched.
    pub async fn patch(
        &self,
        table_id: TableId,
        game: GameType,
        entry: &HistoryEntry,
    ) -> Result<bool, CacheError> {
        let key = history_key(table_id);
        let raw_entries = self.store.lrange(&key, 0, -1).await?;
        for (index, raw) in raw_entries.iter().enumerate() {
            let existing: HistoryEntry = decode(&key, raw)?;
            if existing.round_id != entry.round_id {
                continue;
            }
            let index = isize::try_from(index).map_err(|_| CacheError::IndexOutOfRange {
                key: key.clone(),
                index: isize::MAX,
            })?;
            self.store
                .lset(&key, index, &serde_json::to_string(entry)?)
                .await?;
            if game == GameType::Roulette {
                self.count_number(table_id, existing.counted_number(), -1)
                    .await?;
                self.count_number(table_id, entry.counted_number(), 1).await?;
            }
            return Ok(true);
        }
        tracing::debug!(
            target: LOG_TARGET,
            table_id,
            round_id = entry.round_id,
            "round no longer in visible history"
        );
        Ok(false)
    }

    pub async fn clear(&self, table_id: TableId) -> Result<(), CacheError> {
        self.store.del(&history_key(table_id)).await?;
        Ok(())
    }

    /// Drop both roulette aggregates and rebuild them from the visible list.
    pub async fn recompute_roulette_stats(&self, table_id: TableId) -> Result<(), CacheError> {
        self.store.del(&ranking_key(table_id)).await?;
        self.store.del(&stats_key(table_id)).await?;
        for entry in self.entries(table_id).await? {
            self.count_number(table_id, entry.counted_number(), 1).await?;
        }
        Ok(())
    }

    pub async fn roulette_stats(&self, table_id: TableId) -> Result<RouletteStats, CacheError> {
        let ranking_key = ranking_key(table_id);
        let mut ranking = Vec::new();
        for (field, raw) in self.store.hgetall(&ranking_key).await? {
            let number = field
                .parse::<u8>()
                .map_err(|_| CacheError::WrongType(ranking_key.clone()))?;
            let hits = raw
                .parse::<i64>()
                .map_err(|_| CacheError::WrongType(ranking_key.clone()))?;
            if hits > 0 {
                ranking.push((number, hits));
            }
        }
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let stats_key = stats_key(table_id);
        let mut stats = RouletteStats {
            ranking,
            ..Default::default()
        };
        for (field, raw) in self.store.hgetall(&stats_key).await? {
            let count = raw
                .parse::<i64>()
                .map_err(|_| CacheError::WrongType(stats_key.clone()))?;
            match field.as_str() {
                TOTAL => stats.total = count,
                RED => stats.red = count,
                BLACK => stats.black = count,
                ODD => stats.odd = count,
                EVEN => stats.even = count,
                ZERO => stats.zero = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn count_number(
        &self,
        table_id: TableId,
        number: Option<u8>,
        delta: i64,
    ) -> Result<(), CacheError> {
        let Some(number) = number else {
            return Ok(());
        };
        self.store
            .hincr(&ranking_key(table_id), &number.to_string(), delta)
            .await?;

        let stats_key = stats_key(table_id);
        self.store.hincr(&stats_key, TOTAL, delta).await?;
        if number == 0 {
            self.store.hincr(&stats_key, ZERO, delta).await?;
            return Ok(());
        }
        let colour = if roulette::is_red(number) { RED } else { BLACK };
        let parity = if number % 2 == 1 { ODD } else { EVEN };
        self.store.hincr(&stats_key, colour, delta).await?;
        self.store.hincr(&stats_key, parity, delta).await?;
        Ok(())
    }
}
