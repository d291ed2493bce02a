use crate::cache::CacheError;
use crate::game::{CalcError, GameType};
use crate::ledger::{RoundId, RoundStatus, StorageError, TableId};
use crate::lock::LockType;

#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error("{lock} is already in progress on table {table_id}")]
    Locked { lock: LockType, table_id: TableId },
    #[error("table {0} not found")]
    TableNotFound(TableId),
    #[error("table {table_id} cannot start a round: {reason}")]
    NotAllowStart { table_id: TableId, reason: &'static str },
    #[error("table {0} has no shoe; shuffle first")]
    ShoeNotReady(TableId),
    #[error("shoe {shoe_no} of table {table_id} is exhausted; shuffle first")]
    ShoeExhausted { table_id: TableId, shoe_no: i64 },
    #[error("table {0} cannot shuffle while a round is open")]
    NotAllowShuffle(TableId),
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("round is {actual}, request says {expected}")]
    GameTypeMismatch { expected: GameType, actual: GameType },
    #[error("round {0} is already settled")]
    RoundAlreadySettled(RoundId),
    #[error("round {round_id} cannot be settled in status {status:?}")]
    RoundNotSettleable { round_id: RoundId, status: RoundStatus },
    #[error("round {round_id} cannot be resettled in status {status:?}")]
    RoundNotResettleable { round_id: RoundId, status: RoundStatus },
    #[error("round {round_id} cannot be cancelled in status {status:?}")]
    RoundNotCancellable { round_id: RoundId, status: RoundStatus },
    #[error("round {0} changed status while the request ran; retry")]
    RoundStateConflict(RoundId),
    #[error("neither result nor details were supplied")]
    MissingOutcome,
    #[error("invalid outcome: {0}")]
    InvalidOutcome(#[from] CalcError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl RoundError {
    /// Stable numeric code surfaced to operators.
    pub fn code(&self) -> u32 {
        match self {
            RoundError::Locked { .. } => 1001,
            RoundError::TableNotFound(_) => 1002,
            RoundError::NotAllowStart { .. } => 1003,
            RoundError::ShoeNotReady(_) => 1004,
            RoundError::ShoeExhausted { .. } => 1005,
            RoundError::NotAllowShuffle(_) => 1006,
            RoundError::RoundNotFound(_) => 1010,
            RoundError::GameTypeMismatch { .. } => 1011,
            RoundError::RoundAlreadySettled(_) => 1012,
            RoundError::RoundNotSettleable { .. } => 1013,
            RoundError::RoundNotResettleable { .. } => 1014,
            RoundError::RoundNotCancellable { .. } => 1015,
            RoundError::RoundStateConflict(_) => 1016,
            RoundError::MissingOutcome => 1020,
            RoundError::InvalidOutcome(_) => 1021,
            RoundError::Storage(_) => 5001,
            RoundError::Cache(_) => 5002,
        }
    }

    /// Precondition violations, reported to the caller and never retried.
    pub fn is_business(&self) -> bool {
        self.code() < 5000
    }
}
