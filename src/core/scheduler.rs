//! Periodic task runner.
//!
//! Every scheduled job gets its own tokio task and its own clock: the
//! job is invoked at `T, 2T, 3T, ...` after scheduling until the runner
//! shuts down. Each invocation runs as a separate task so an error or a
//! panic is reported and the schedule simply continues.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Boxed future returned by a job action
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type JobAction = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Shortest interval a job can be scheduled with
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A named zero-argument action repeated at a fixed interval
#[derive(Clone)]
pub struct PeriodicJob {
    name: String,
    interval: Duration,
    action: JobAction,
}

impl PeriodicJob {
    /// Create a job. Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval: interval.max(MIN_INTERVAL),
            action: Arc::new(move || Box::pin(action()) as JobFuture),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Runs periodic jobs for the lifetime of the process
#[derive(Default)]
pub struct Scheduler {
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a job's schedule. Must be called within a tokio runtime.
    pub fn schedule(&mut self, job: PeriodicJob) {
        tracing::debug!("Scheduling '{}' every {:?}", job.name, job.interval);
        self.tasks.spawn(run_periodic(job));
    }

    /// Number of running schedules
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop all schedules, including invocations in flight
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("jobs", &self.tasks.len()).finish()
    }
}

/// Aborts the wrapped invocation when its schedule is torn down
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_periodic(job: PeriodicJob) {
    let mut ticker = tokio::time::interval_at(Instant::now() + job.interval, job.interval);
    // Ticks missed while a slow invocation runs are dropped, not replayed in a burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let handle = tokio::spawn((job.action)());
        let _guard = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Periodic job '{}' failed: {:#}", job.name, e);
            }
            Err(e) if e.is_panic() => {
                tracing::error!("Periodic job '{}' panicked", job.name);
            }
            Err(_) => {
                tracing::debug!("Periodic job '{}' cancelled", job.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_interval_is_clamped() {
        let job = PeriodicJob::new("noop", Duration::ZERO, || async { Ok(()) });
        assert_eq!(job.interval(), MIN_INTERVAL);
        assert_eq!(job.name(), "noop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_invocation_after_one_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut scheduler = Scheduler::new();
        scheduler.schedule(PeriodicJob::new("count", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_invocations() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut scheduler = Scheduler::new();
        scheduler.schedule(PeriodicJob::new("count", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;
        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}
