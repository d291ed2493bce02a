//! Hand-off of settlement jobs from the ledger to the job queue.
//!
//! The controller stages every job in the ledger transaction that finalizes
//! its order, so a committed settlement always has its money movements on
//! disk. The relay forwards staged jobs to the queue and unstages them once
//! the queue holds them; anything the queue refuses stays staged and is
//! picked up by the next relay pass.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ledger::{LedgerStorage, StorageError};
use crate::tokio_tools::{now_millis, spawn_named_task};

use super::queue::{JobOptions, JobQueue, QueueError};

const LOG_TARGET: &str = "jobs::outbox";

/// Staged jobs read per relay pass.
const RELAY_BATCH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub forwarded: usize,
    /// Jobs the queue refused; still staged.
    pub left: usize,
}

pub struct OutboxRelay {
    ledger: Arc<dyn LedgerStorage>,
    queue: Arc<JobQueue>,
    options: JobOptions,
}

impl OutboxRelay {
    pub fn new(ledger: Arc<dyn LedgerStorage>, queue: Arc<JobQueue>, options: JobOptions) -> Self {
        Self {
            ledger,
            queue,
            options,
        }
    }

    /// Enqueue staged jobs and unstage the ones the queue accepted. A job
    /// already pending counts as accepted.
    pub async fn forward(
        &self,
        jobs: &[(String, Value)],
        now_ms: i64,
    ) -> Result<RelayReport, OutboxError> {
        let mut accepted = Vec::with_capacity(jobs.len());
        let mut report = RelayReport::default();
        for (job_key, payload) in jobs {
            match self.queue.enqueue(job_key, payload, self.options, now_ms).await {
                Ok(_) => accepted.push(job_key.as_str()),
                Err(err) => {
                    report.left += 1;
                    tracing::error!(
                        target: LOG_TARGET,
                        job_key = %job_key,
                        error = %err,
                        "settlement job left staged"
                    );
                }
            }
        }
        if !accepted.is_empty() {
            let mut txn = self.ledger.begin().await?;
            for job_key in &accepted {
                if let Err(err) = txn.unstage_job(job_key).await {
                    txn.rollback().await;
                    return Err(err.into());
                }
            }
            txn.commit().await?;
        }
        report.forwarded = accepted.len();
        Ok(report)
    }

    /// Forward whatever is still staged, oldest first.
    pub async fn relay_pending(&self, now_ms: i64) -> Result<RelayReport, OutboxError> {
        let staged = {
            let mut txn = self.ledger.begin().await?;
            let staged = txn.staged_jobs(RELAY_BATCH).await;
            txn.rollback().await;
            staged?
        };
        if staged.is_empty() {
            return Ok(RelayReport::default());
        }
        let jobs: Vec<(String, Value)> = staged
            .into_iter()
            .map(|entry| (entry.job_key, entry.payload))
            .collect();
        let report = self.forward(&jobs, now_ms).await?;
        tracing::info!(
            target: LOG_TARGET,
            forwarded = report.forwarded,
            left = report.left,
            "relayed staged settlement jobs"
        );
        Ok(report)
    }

    /// Relay every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_named_task("settlement-outbox-relay", async move {
            loop {
                if let Err(err) = self.relay_pending(now_millis()).await {
                    tracing::warn!(target: LOG_TARGET, error = %err, "relay pass failed");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}
