//! Round countdown timers kept as delayed jobs, so a restarted process picks
//! up pending stop-betting deadlines from the queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ledger::{RoundId, TableId};
use crate::round::{RoundController, RoundError};

use super::{JobError, JobHandler, JobRecord};

const LOG_TARGET: &str = "jobs::timers";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundTimerJob {
    /// Close betting once the countdown ran out.
    StopBetting { table_id: TableId, round_id: RoundId },
    /// Periodic countdown broadcast while betting is open.
    Tick { table_id: TableId, round_id: RoundId },
}

impl RoundTimerJob {
    pub fn job_id(&self) -> String {
        match self {
            RoundTimerJob::StopBetting { table_id, round_id } => {
                format!("stop-betting:{table_id}:{round_id}")
            }
            RoundTimerJob::Tick { table_id, round_id } => {
                format!("round-tick:{table_id}:{round_id}")
            }
        }
    }
}

pub struct RoundTimerHandler {
    controller: Arc<RoundController>,
}

impl RoundTimerHandler {
    pub fn new(controller: Arc<RoundController>) -> Self {
        Self { controller }
    }
}

fn timer_error(err: RoundError) -> Result<(), JobError> {
    if err.is_business() {
        // The round moved on without us; nothing to retry.
        tracing::debug!(target: LOG_TARGET, error = %err, "timer fired for a stale round");
        Ok(())
    } else {
        Err(JobError::retryable(err))
    }
}

#[async_trait]
impl JobHandler for RoundTimerHandler {
    async fn handle(&self, job: &JobRecord) -> Result<(), JobError> {
        match job.decode::<RoundTimerJob>()? {
            RoundTimerJob::StopBetting { table_id, round_id } => {
                match self.controller.stop_betting(table_id, round_id).await {
                    Ok(_) => Ok(()),
                    Err(err) => timer_error(err),
                }
            }
            RoundTimerJob::Tick { table_id, round_id } => {
                match self.controller.countdown_tick(table_id, round_id).await {
                    Ok(()) => Ok(()),
                    Err(err) => timer_error(err),
                }
            }
        }
    }
}
