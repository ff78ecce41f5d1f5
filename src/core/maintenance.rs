//! Maintenance jobs registered with the periodic runner at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use super::metrics::Metrics;
use super::scheduler::PeriodicJob;
use crate::adapters::SqliteStore;

/// Upper bound on the stalled-attempt sweep interval
pub const MAX_TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How often expired tokens are removed
pub const TOKEN_EXPIRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How often metrics are recomputed
pub const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Interval of the stalled-attempt sweep: `min(30s, worker_timeout)`
pub fn timeout_sweep_interval(worker_timeout: Duration) -> Duration {
    worker_timeout.min(MAX_TIMEOUT_SWEEP_INTERVAL)
}

/// Fail attempts that stopped sending keepalives
pub async fn timeout_attempts(store: &SqliteStore, worker_timeout: Duration) -> Result<usize> {
    let timeout =
        chrono::Duration::from_std(worker_timeout).context("Worker timeout out of range")?;

    let ended = store
        .timeout_attempts(Utc::now(), timeout)
        .await
        .context("Failed to time out stalled attempts")?;

    if ended > 0 {
        tracing::info!("Timed out {} stalled task attempt(s)", ended);
    }
    Ok(ended)
}

/// Delete tokens past their validity
pub async fn remove_expired_tokens(store: &SqliteStore) -> Result<usize> {
    let removed = store
        .remove_expired_tokens(Utc::now())
        .await
        .context("Failed to remove expired tokens")?;

    if removed > 0 {
        tracing::info!("Removed {} expired token(s)", removed);
    }
    Ok(removed)
}

/// Recompute gauges from the store
pub async fn refresh_metrics(store: &SqliteStore, metrics: &Metrics) -> Result<()> {
    let counts = store.counts().await.context("Failed to count store rows")?;
    metrics.update(&counts, Utc::now());
    Ok(())
}

/// The maintenance jobs the service runs for its whole lifetime
pub fn maintenance_jobs(
    store: SqliteStore,
    metrics: Arc<Metrics>,
    worker_timeout: Duration,
) -> Vec<PeriodicJob> {
    let timeout_store = store.clone();
    let token_store = store.clone();
    let metrics_store = store;

    vec![
        PeriodicJob::new(
            "timeout-attempts",
            timeout_sweep_interval(worker_timeout),
            move || {
                let store = timeout_store.clone();
                async move { timeout_attempts(&store, worker_timeout).await.map(|_| ()) }
            },
        ),
        PeriodicJob::new("remove-expired-tokens", TOKEN_EXPIRY_INTERVAL, move || {
            let store = token_store.clone();
            async move { remove_expired_tokens(&store).await.map(|_| ()) }
        }),
        PeriodicJob::new("refresh-metrics", METRICS_REFRESH_INTERVAL, move || {
            let store = metrics_store.clone();
            let metrics = Arc::clone(&metrics);
            async move { refresh_metrics(&store, &metrics).await }
        }),
    ]
}
