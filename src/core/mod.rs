//! Process-level services.
//!
//! This module contains:
//! - Scheduler: Periodic task runner
//! - Maintenance: Jobs the runner drives for the process lifetime
//! - Metrics: Gauges refreshed by the metrics job
//! - Service: Startup and shutdown of the worker and the jobs

pub mod maintenance;
pub mod metrics;
pub mod scheduler;
pub mod service;

// Re-export commonly used types
pub use maintenance::maintenance_jobs;
pub use metrics::{Metrics, MetricsSnapshot};
pub use scheduler::{PeriodicJob, Scheduler};
pub use service::Service;
