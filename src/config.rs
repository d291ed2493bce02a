use std::time::Duration;

/// Tunables for the round controller, the job pipeline and the caches.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Betting window used when a table has no countdown of its own.
    pub default_countdown: Duration,
    /// Period of the countdown broadcast while betting is open.
    pub tick_interval: Duration,
    pub start_lock_ttl: Duration,
    pub settle_lock_ttl: Duration,
    pub job_attempts: u32,
    pub backoff_base: Duration,
    /// Lifetime of the "already applied" marker written after a settlement job.
    pub applied_marker_ttl: Duration,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub claim_ttl: Duration,
    /// Period of the pass that moves staged settlement jobs into the queue.
    pub relay_interval: Duration,
    /// Visible history window for games without a card shoe.
    pub history_cap: usize,
    /// Last round number of a shoe.
    pub round_rollover: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_countdown: Duration::from_secs(15),
            tick_interval: Duration::from_secs(3),
            start_lock_ttl: Duration::from_secs(3),
            settle_lock_ttl: Duration::from_secs(10),
            job_attempts: 5,
            backoff_base: Duration::from_secs(1),
            applied_marker_ttl: Duration::from_secs(600),
            worker_concurrency: 16,
            poll_interval: Duration::from_millis(200),
            claim_ttl: Duration::from_secs(30),
            relay_interval: Duration::from_secs(1),
            history_cap: 100,
            round_rollover: 99,
        }
    }
}
