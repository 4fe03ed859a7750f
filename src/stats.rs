//! Cross-cutting statistics.
//!
//! Workers record cycle outcomes, the drain records persistence outcomes,
//! and control callers take snapshots. Everything sits behind one mutex;
//! updates are tiny, so contention is negligible next to inference.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::UseCase;

/// Totals across all cameras since start.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregateStats {
    pub total_cameras: usize,
    pub active_cameras: usize,
    pub frames_processed: u64,
    pub total_events: u64,
    pub events_by_camera: BTreeMap<String, u64>,
    pub events_by_use_case: BTreeMap<UseCase, u64>,
    pub persisted_events: u64,
    /// Results dropped at enqueue because the drain queue was full.
    pub dropped_results: u64,
    /// Results still queued when the drain hit its shutdown grace deadline.
    pub dropped_at_shutdown: u64,
    /// Individual events or frames that failed to persist.
    pub drain_failures: u64,
}

#[derive(Default)]
pub struct StatsAggregator {
    inner: Mutex<AggregateStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregateStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_camera_counts(&self, total: usize, active: usize) {
        let mut stats = self.lock();
        stats.total_cameras = total;
        stats.active_cameras = active;
    }

    pub fn record_cycle(&self, camera_id: &str, events_by_use_case: &BTreeMap<UseCase, usize>) {
        let mut stats = self.lock();
        stats.frames_processed += 1;
        for (use_case, count) in events_by_use_case {
            if *count == 0 {
                continue;
            }
            let count = *count as u64;
            stats.total_events += count;
            *stats.events_by_camera.entry(camera_id.to_string()).or_insert(0) += count;
            *stats.events_by_use_case.entry(*use_case).or_insert(0) += count;
        }
    }

    pub fn record_persisted(&self, events: u64) {
        self.lock().persisted_events += events;
    }

    pub fn record_enqueue_drop(&self) {
        self.lock().dropped_results += 1;
    }

    pub fn record_shutdown_drops(&self, count: u64) {
        self.lock().dropped_at_shutdown += count;
    }

    pub fn record_drain_failure(&self) {
        self.lock().drain_failures += 1;
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.lock().clone()
    }
}
