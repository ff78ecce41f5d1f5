//! Service bootstrap.
//!
//! Loads the autoprocess configuration, opens the store, starts the
//! ingestion worker and registers the maintenance jobs. Everything started
//! here is stopped again by [`Service::shutdown`].

use std::sync::Arc;

use anyhow::{Context, Result};

use super::maintenance::maintenance_jobs;
use super::metrics::Metrics;
use super::scheduler::Scheduler;
use crate::adapters::{FsMediaStorage, SqliteStore};
use crate::config::{ServiceConfig, WatchConfig};
use crate::ingest::{IngestHandle, IngestSettings, IngestState, IngestWorker};

/// Running background services of the process
pub struct Service {
    ingest: IngestHandle,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
    store: SqliteStore,
}

impl Service {
    /// Start from the resolved configuration
    pub async fn start(config: &ServiceConfig) -> Result<Self> {
        let watch = WatchConfig::load_or_empty(&config.autoprocess_config);

        let db_path = config.database_path();
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        let media = FsMediaStorage::new(config.media_dir());

        Self::start_with(config, watch, store, media).await
    }

    /// Start with explicit collaborators
    pub async fn start_with(
        config: &ServiceConfig,
        watch: WatchConfig,
        store: SqliteStore,
        media: FsMediaStorage,
    ) -> Result<Self> {
        let shared = Arc::new(store.clone());
        let worker = IngestWorker::new(
            IngestSettings::from(config),
            watch,
            shared.clone(),
            shared,
            Arc::new(media),
        );
        let ingest = worker
            .start()
            .await
            .context("Failed to start ingestion worker")?;

        let metrics = Arc::new(Metrics::new());
        let mut scheduler = Scheduler::new();
        for job in maintenance_jobs(store.clone(), Arc::clone(&metrics), config.worker_timeout) {
            tracing::info!("Periodic job '{}' every {:?}", job.name(), job.interval());
            scheduler.schedule(job);
        }

        Ok(Self {
            ingest,
            scheduler,
            metrics,
            store,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn ingest_state(&self) -> IngestState {
        self.ingest.state()
    }

    /// Number of periodic jobs running
    pub fn job_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Stop the periodic jobs, then let the worker finish its cycle
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown().await;
        self.ingest.stop().await
    }
}
