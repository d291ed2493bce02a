use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::{HistoryEntry, RouletteStats};
use crate::jobs::JobRecord;
use crate::ledger::TableId;

/// Success envelope. Business rejections use the same shape with a non-zero
/// code and a message instead of data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { code: 0, data }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ShuffleRequest {
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBettingResponse {
    pub table_id: TableId,
    pub round_id: i64,
    pub stopped: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub table_id: TableId,
    pub rounds: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberCount {
    pub number: u8,
    pub count: i64,
}

/// Roulette statistics with each share expressed in percent of the window.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouletteStatsResponse {
    pub table_id: TableId,
    pub total: i64,
    pub ranking: Vec<NumberCount>,
    pub red: Decimal,
    pub black: Decimal,
    pub odd: Decimal,
    pub even: Decimal,
    pub zero: Decimal,
}

impl RouletteStatsResponse {
    pub fn from_stats(table_id: TableId, stats: &RouletteStats) -> Self {
        Self {
            table_id,
            total: stats.total,
            ranking: stats
                .ranking
                .iter()
                .map(|&(number, count)| NumberCount { number, count })
                .collect(),
            red: stats.percent(stats.red),
            black: stats.percent(stats.black),
            odd: stats.percent(stats.odd),
            even: stats.percent(stats.even),
            zero: stats.percent(stats.zero),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadJobsResponse {
    pub queue: String,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub job_id: String,
    pub requeued: bool,
}
