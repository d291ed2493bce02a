//! Persistent delayed jobs.
//!
//! Jobs live in the key-value store, not in process memory, so pending
//! settlements and round timers survive restarts. Settlement jobs are staged
//! in the ledger first and relayed into their queue after commit. Delivery
//! is at least once; handlers make the effect exactly once.

pub mod backoff;
pub mod outbox;
pub mod queue;
pub mod settlement;
pub mod timers;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use outbox::{OutboxError, OutboxRelay, RelayReport};
pub use queue::{FailOutcome, JobOptions, JobQueue, QueueError, Repeat};
pub use settlement::{SettlementJob, SettlementProcessor};
pub use timers::{RoundTimerHandler, RoundTimerJob};
pub use worker::{JobWorker, PassReport, WorkerConfig};

/// Queue names.
pub const SETTLEMENT_QUEUE: &str = "settlement";
pub const ROUND_TIMER_QUEUE: &str = "round-timers";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub run_at_ms: i64,
    #[serde(default)]
    pub repeat_every_ms: Option<u64>,
    #[serde(default)]
    pub repeat_until_ms: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at_ms: i64,
}

impl JobRecord {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|err| JobError::Permanent(format!("malformed payload of {}: {err}", self.id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Transient; the queue retries with backoff until attempts run out.
    #[error("retryable: {0}")]
    Retryable(String),
    /// Retrying cannot help; the job goes straight to the dead list.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(err: impl std::fmt::Display) -> Self {
        Self::Retryable(err.to_string())
    }

    pub fn permanent(err: impl std::fmt::Display) -> Self {
        Self::Permanent(err.to_string())
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<(), JobError>;
}
