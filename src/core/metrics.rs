//! In-process gauges refreshed by the metrics job.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use crate::adapters::StoreCounts;
use crate::domain::TaskState;

/// Current values of the store gauges
#[derive(Debug, Default)]
pub struct Metrics {
    users: AtomicU64,
    documents: AtomicU64,
    tasks_new: AtomicU64,
    tasks_assigned: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    /// Unix millis of the last refresh, 0 if never refreshed
    refreshed_at_ms: AtomicI64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub users: u64,
    pub documents: u64,
    pub tasks_new: u64,
    pub tasks_assigned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all gauges with fresh counts
    pub fn update(&self, counts: &StoreCounts, now: DateTime<Utc>) {
        self.users.store(counts.users, Ordering::Relaxed);
        self.documents.store(counts.documents, Ordering::Relaxed);
        self.tasks_new.store(counts.tasks_in(TaskState::New), Ordering::Relaxed);
        self.tasks_assigned
            .store(counts.tasks_in(TaskState::Assigned), Ordering::Relaxed);
        self.tasks_completed
            .store(counts.tasks_in(TaskState::Completed), Ordering::Relaxed);
        self.tasks_failed
            .store(counts.tasks_in(TaskState::Failed), Ordering::Relaxed);
        self.refreshed_at_ms
            .store(now.timestamp_millis(), Ordering::Release);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let refreshed_ms = self.refreshed_at_ms.load(Ordering::Acquire);

        MetricsSnapshot {
            users: self.users.load(Ordering::Relaxed),
            documents: self.documents.load(Ordering::Relaxed),
            tasks_new: self.tasks_new.load(Ordering::Relaxed),
            tasks_assigned: self.tasks_assigned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            refreshed_at: if refreshed_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(refreshed_ms).single()
            },
        }
    }
}
