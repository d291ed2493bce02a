use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{decode, CacheError, KeyValueStore};

use super::backoff::{jittered_backoff, retry_delay};
use super::{JobError, JobRecord};

const LOG_TARGET: &str = "jobs::queue";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("job payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repeat {
    pub every: Duration,
    /// Last instant (ms since epoch) a repetition may be scheduled at.
    pub until_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: Duration,
    pub delay: Duration,
    pub repeat: Option<Repeat>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(1),
            delay: Duration::ZERO,
            repeat: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailOutcome {
    Retry { run_at_ms: i64 },
    Dead,
    /// The job was removed while it ran; nothing was rescheduled.
    Removed,
}

/// Named job queue over hashes of the key-value store.
///
/// `queue:{name}:jobs` holds pending jobs by id, `queue:{name}:dead` holds
/// exhausted ones, and `queue:{name}:claim:{id}` is the short lease a worker
/// takes before running a job.
pub struct JobQueue {
    store: Arc<dyn KeyValueStore>,
    name: String,
}

impl JobQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn jobs_key(&self) -> String {
        format!("queue:{}:jobs", self.name)
    }

    fn dead_key(&self) -> String {
        format!("queue:{}:dead", self.name)
    }

    fn claim_key(&self, id: &str) -> String {
        format!("queue:{}:claim:{id}", self.name)
    }

    /// Add a job unless one with the same id is already pending.
    /// Returns whether the job was added.
    pub async fn enqueue<T: Serialize>(
        &self,
        id: &str,
        payload: &T,
        options: JobOptions,
        now_ms: i64,
    ) -> Result<bool, QueueError> {
        let record = JobRecord {
            id: id.to_string(),
            payload: serde_json::to_value(payload)?,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            backoff_ms: options.backoff.as_millis() as u64,
            run_at_ms: now_ms + options.delay.as_millis() as i64,
            repeat_every_ms: options.repeat.map(|repeat| repeat.every.as_millis() as u64),
            repeat_until_ms: options.repeat.map(|repeat| repeat.until_ms),
            last_error: None,
            created_at_ms: now_ms,
        };
        let added = self
            .store
            .hset_nx(&self.jobs_key(), id, &serde_json::to_string(&record)?)
            .await?;
        if added {
            tracing::debug!(target: LOG_TARGET, queue = %self.name, job_id = id, run_at_ms = record.run_at_ms, "job enqueued");
        } else {
            tracing::debug!(target: LOG_TARGET, queue = %self.name, job_id = id, "duplicate job ignored");
        }
        Ok(added)
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let key = self.jobs_key();
        match self.store.hget(&key, id).await? {
            Some(raw) => Ok(Some(decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    pub async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.store.hgetall(&self.jobs_key()).await?.len())
    }

    pub async fn pending(&self) -> Result<Vec<JobRecord>, QueueError> {
        let key = self.jobs_key();
        let mut jobs = self
            .store
            .hgetall(&key)
            .await?
            .into_iter()
            .map(|(_, raw)| decode::<JobRecord>(&key, &raw))
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| {
            a.run_at_ms
                .cmp(&b.run_at_ms)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    /// Pending jobs whose run time has come, earliest first.
    pub async fn due(&self, now_ms: i64) -> Result<Vec<JobRecord>, QueueError> {
        let mut jobs = self.pending().await?;
        jobs.retain(|job| job.run_at_ms <= now_ms);
        Ok(jobs)
    }

    /// Take the run lease of a job. Only one worker wins it per TTL.
    pub async fn claim(&self, id: &str, ttl: Duration) -> Result<bool, QueueError> {
        Ok(self.store.set_nx(&self.claim_key(id), "1", ttl).await?)
    }

    async fn release_claim(&self, id: &str) -> Result<(), QueueError> {
        self.store.del(&self.claim_key(id)).await?;
        Ok(())
    }

    /// Drop a pending job. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self.store.hdel(&self.jobs_key(), id).await?)
    }

    /// Finish a run: repeating jobs are re-armed while the next run stays
    /// within their window, everything else is removed.
    pub async fn complete(&self, job: &JobRecord, now_ms: i64) -> Result<(), QueueError> {
        let next = match (job.repeat_every_ms, job.repeat_until_ms) {
            (Some(every), Some(until)) => {
                let next = job.run_at_ms.max(now_ms) + every as i64;
                (next <= until).then_some(next)
            }
            _ => None,
        };
        match next {
            Some(run_at_ms) => {
                let mut rearmed = job.clone();
                rearmed.run_at_ms = run_at_ms;
                rearmed.attempts_made = 0;
                rearmed.last_error = None;
                let rearmed = self
                    .store
                    .hset_xx(&self.jobs_key(), &job.id, &serde_json::to_string(&rearmed)?)
                    .await?;
                if !rearmed {
                    tracing::debug!(target: LOG_TARGET, queue = %self.name, job_id = %job.id, "removed while running; not re-armed");
                }
            }
            None => {
                self.store.hdel(&self.jobs_key(), &job.id).await?;
            }
        }
        self.release_claim(&job.id).await
    }

    /// Record a failed run and decide between a delayed retry and the dead list.
    pub async fn fail(
        &self,
        job: &JobRecord,
        error: &JobError,
        now_ms: i64,
    ) -> Result<FailOutcome, QueueError> {
        let mut failed = job.clone();
        failed.attempts_made += 1;
        failed.last_error = Some(error.to_string());

        let exhausted = failed.attempts_made >= failed.max_attempts;
        let outcome = if matches!(error, JobError::Permanent(_)) || exhausted {
            // Dead entry first, so a crash in between keeps the job somewhere.
            self.store
                .hset(&self.dead_key(), &job.id, &serde_json::to_string(&failed)?)
                .await?;
            if !self.store.hdel(&self.jobs_key(), &job.id).await? {
                self.store.hdel(&self.dead_key(), &job.id).await?;
                self.release_claim(&job.id).await?;
                return Ok(FailOutcome::Removed);
            }
            tracing::error!(
                target: LOG_TARGET,
                queue = %self.name,
                job_id = %job.id,
                attempt = failed.attempts_made,
                error = %error,
                "job moved to dead list"
            );
            FailOutcome::Dead
        } else {
            let delay = {
                let mut rng = rand::thread_rng();
                jittered_backoff(
                    &mut rng,
                    retry_delay(Duration::from_millis(failed.backoff_ms), failed.attempts_made),
                )
            };
            failed.run_at_ms = now_ms + delay.as_millis() as i64;
            let rescheduled = self
                .store
                .hset_xx(&self.jobs_key(), &job.id, &serde_json::to_string(&failed)?)
                .await?;
            if !rescheduled {
                self.release_claim(&job.id).await?;
                return Ok(FailOutcome::Removed);
            }
            tracing::warn!(
                target: LOG_TARGET,
                queue = %self.name,
                job_id = %job.id,
                attempt = failed.attempts_made,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "job failed; retry scheduled"
            );
            FailOutcome::Retry {
                run_at_ms: failed.run_at_ms,
            }
        };
        self.release_claim(&job.id).await?;
        Ok(outcome)
    }

    /// Exhausted jobs with their last error, for manual inspection.
    pub async fn dead_jobs(&self) -> Result<Vec<JobRecord>, QueueError> {
        let key = self.dead_key();
        let mut jobs = self
            .store
            .hgetall(&key)
            .await?
            .into_iter()
            .map(|(_, raw)| decode::<JobRecord>(&key, &raw))
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    /// Re-arm a dead job with a fresh attempt budget.
    pub async fn retry_dead(&self, id: &str, now_ms: i64) -> Result<bool, QueueError> {
        let dead_key = self.dead_key();
        let Some(raw) = self.store.hget(&dead_key, id).await? else {
            return Ok(false);
        };
        let mut job: JobRecord = decode(&dead_key, &raw)?;
        job.attempts_made = 0;
        job.run_at_ms = now_ms;
        let added = self
            .store
            .hset_nx(&self.jobs_key(), id, &serde_json::to_string(&job)?)
            .await?;
        if added {
            self.store.hdel(&dead_key, id).await?;
            tracing::info!(target: LOG_TARGET, queue = %self.name, job_id = id, "dead job re-armed");
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use serde_json::json;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn duplicate_ids_are_ignored() -> anyhow::Result<()> {
        let queue = queue();
        assert!(queue.enqueue("a", &json!({"n": 1}), JobOptions::default(), 0).await?);
        assert!(!queue.enqueue("a", &json!({"n": 2}), JobOptions::default(), 0).await?);
        let job = queue.get("a").await?.expect("job");
        assert_eq!(job.payload, json!({"n": 1}));
        assert_eq!(queue.len().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn delayed_jobs_become_due_later() -> anyhow::Result<()> {
        let queue = queue();
        let options = JobOptions {
            delay: Duration::from_millis(500),
            ..JobOptions::default()
        };
        queue.enqueue("late", &json!(null), options, 1_000).await?;
        queue.enqueue("now", &json!(null), JobOptions::default(), 1_000).await?;

        let due: Vec<String> = queue.due(1_000).await?.into_iter().map(|j| j.id).collect();
        assert_eq!(due, vec!["now"]);
        let due: Vec<String> = queue.due(1_500).await?.into_iter().map(|j| j.id).collect();
        assert_eq!(due, vec!["now", "late"]);
        Ok(())
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_released() -> anyhow::Result<()> {
        let queue = queue();
        queue.enqueue("a", &json!(null), JobOptions::default(), 0).await?;
        let ttl = Duration::from_secs(30);
        assert!(queue.claim("a", ttl).await?);
        assert!(!queue.claim("a", ttl).await?);

        let job = queue.get("a").await?.expect("job");
        queue.complete(&job, 0).await?;
        assert!(queue.get("a").await?.is_none());
        assert!(queue.claim("a", ttl).await?);
        Ok(())
    }

    #[tokio::test]
    async fn retries_back_off_then_die() -> anyhow::Result<()> {
        let queue = queue();
        let options = JobOptions {
            attempts: 3,
            backoff: Duration::from_millis(1_000),
            ..JobOptions::default()
        };
        queue.enqueue("a", &json!(null), options, 0).await?;
        let error = JobError::retryable("wallet timeout");

        let job = queue.get("a").await?.expect("job");
        let FailOutcome::Retry { run_at_ms } = queue.fail(&job, &error, 10_000).await? else {
            panic!("first failure must retry");
        };
        assert!((10_500..=11_000).contains(&run_at_ms));

        let job = queue.get("a").await?.expect("job");
        let FailOutcome::Retry { run_at_ms } = queue.fail(&job, &error, 20_000).await? else {
            panic!("second failure must retry");
        };
        assert!((21_000..=22_000).contains(&run_at_ms));

        let job = queue.get("a").await?.expect("job");
        assert_eq!(queue.fail(&job, &error, 30_000).await?, FailOutcome::Dead);
        assert!(queue.get("a").await?.is_none());

        let dead = queue.dead_jobs().await?;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts_made, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("retryable: wallet timeout"));

        assert!(queue.retry_dead("a", 40_000).await?);
        let job = queue.get("a").await?.expect("re-armed");
        assert_eq!(job.attempts_made, 0);
        assert!(queue.dead_jobs().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn permanent_failures_skip_retries() -> anyhow::Result<()> {
        let queue = queue();
        queue.enqueue("a", &json!(null), JobOptions::default(), 0).await?;
        let job = queue.get("a").await?.expect("job");
        let outcome = queue
            .fail(&job, &JobError::permanent("insufficient balance"), 0)
            .await?;
        assert_eq!(outcome, FailOutcome::Dead);
        Ok(())
    }

    #[tokio::test]
    async fn removed_jobs_stay_removed_after_their_run() -> anyhow::Result<()> {
        let queue = queue();
        let options = JobOptions {
            repeat: Some(Repeat {
                every: Duration::from_millis(3_000),
                until_ms: 60_000,
            }),
            ..JobOptions::default()
        };
        queue.enqueue("tick", &json!(null), options, 0).await?;
        queue.enqueue("stop", &json!(null), JobOptions::default(), 0).await?;
        let tick = queue.get("tick").await?.expect("job");
        let stop = queue.get("stop").await?.expect("job");

        // The round was cancelled while both timers were running.
        assert!(queue.remove("tick").await?);
        assert!(queue.remove("stop").await?);

        queue.complete(&tick, 0).await?;
        let outcome = queue
            .fail(&stop, &JobError::retryable("cache timeout"), 0)
            .await?;
        assert_eq!(outcome, FailOutcome::Removed);
        let outcome = queue
            .fail(&stop, &JobError::permanent("bad payload"), 0)
            .await?;
        assert_eq!(outcome, FailOutcome::Removed);

        assert_eq!(queue.len().await?, 0);
        assert!(queue.dead_jobs().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn repeating_jobs_rearm_within_window() -> anyhow::Result<()> {
        let queue = queue();
        let options = JobOptions {
            repeat: Some(Repeat {
                every: Duration::from_millis(3_000),
                until_ms: 7_000,
            }),
            ..JobOptions::default()
        };
        queue.enqueue("tick", &json!(null), options, 0).await?;

        let job = queue.get("tick").await?.expect("job");
        queue.complete(&job, 0).await?;
        let job = queue.get("tick").await?.expect("re-armed");
        assert_eq!(job.run_at_ms, 3_000);

        queue.complete(&job, 3_000).await?;
        let job = queue.get("tick").await?.expect("re-armed");
        assert_eq!(job.run_at_ms, 6_000);

        queue.complete(&job, 6_000).await?;
        assert!(queue.get("tick").await?.is_none());
        Ok(())
    }
}
