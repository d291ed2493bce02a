use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::tokio_tools::{now_millis, spawn_named_task};

use super::queue::{FailOutcome, JobQueue, QueueError};
use super::JobHandler;

const LOG_TARGET: &str = "jobs::worker";

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub claim_ttl: Duration,
}

impl From<&EngineConfig> for WorkerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            poll_interval: config.poll_interval,
            claim_ttl: config.claim_ttl,
        }
    }
}

/// Outcome counts of one polling pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
    /// Due jobs another worker had already claimed.
    pub skipped: usize,
    /// Jobs removed from the queue while they ran.
    pub removed: usize,
}

impl PassReport {
    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.dead
    }
}

/// Polls one queue and runs due jobs concurrently, at most `concurrency` at a
/// time. A job id is only ever run by the worker holding its claim.
pub struct JobWorker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    permits: Arc<Semaphore>,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            queue,
            handler,
            config,
        }
    }

    pub async fn run_due(&self, now_ms: i64) -> Result<PassReport, QueueError> {
        let mut report = PassReport::default();
        let mut in_flight = FuturesUnordered::new();

        for job in self.queue.due(now_ms).await? {
            if !self.queue.claim(&job.id, self.config.claim_ttl).await? {
                report.skipped += 1;
                continue;
            }
            let handler = Arc::clone(&self.handler);
            let permits = Arc::clone(&self.permits);
            in_flight.push(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = handler.handle(&job).await;
                (job, outcome)
            });
        }

        while let Some((job, outcome)) = in_flight.next().await {
            match outcome {
                Ok(()) => {
                    self.queue.complete(&job, now_ms).await?;
                    report.completed += 1;
                }
                Err(err) => match self.queue.fail(&job, &err, now_ms).await? {
                    FailOutcome::Retry { .. } => report.retried += 1,
                    FailOutcome::Dead => report.dead += 1,
                    FailOutcome::Removed => report.removed += 1,
                },
            }
        }

        if report.processed() > 0 {
            tracing::debug!(
                target: LOG_TARGET,
                queue = %self.queue.name(),
                completed = report.completed,
                retried = report.retried,
                dead = report.dead,
                "worker pass finished"
            );
        }
        Ok(report)
    }

    /// Poll until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let name = format!("job-worker-{}", self.queue.name());
        spawn_named_task(name, async move {
            tracing::info!(target: LOG_TARGET, queue = %self.queue.name(), "worker started");
            loop {
                if let Err(err) = self.run_due(now_millis()).await {
                    tracing::warn!(
                        target: LOG_TARGET,
                        queue = %self.queue.name(),
                        error = %err,
                        "worker pass failed"
                    );
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
            tracing::info!(target: LOG_TARGET, queue = %self.queue.name(), "worker stopped");
        })
    }
}
