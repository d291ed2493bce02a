use std::future::Future;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawn a Tokio task wrapped in a `task` span carrying its name.
pub fn spawn_named_task<F, S>(name: S, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Into<String>,
{
    let name_owned = name.into();
    let span = tracing::info_span!("task", task_name = %name_owned);
    tokio::spawn(future.instrument(span))
}

/// Wall-clock milliseconds since the Unix epoch, the time base of the job queue.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
