//! Workload tracker: worker id → live workload record.
//!
//! Refreshed wholesale once per evaluation cycle from the resource
//! manager. The tracker is reporting state; the only decision that reads
//! it is which unit to release on scale-down.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use scalegrid_core::{Priority, WorkerId, WorkerWorkload};

/// Workers that appeared or disappeared during a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerDelta {
    pub added: Vec<WorkerId>,
    pub removed: Vec<WorkerId>,
}

impl TrackerDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Aggregate view of all tracked workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSummary {
    pub worker_count: usize,
    pub total_requests: u64,
    pub mean_utilization: f64,
    pub mean_latency_ms: f64,
    pub by_priority: BTreeMap<Priority, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkloadTracker {
    workloads: HashMap<WorkerId, WorkerWorkload>,
}

impl WorkloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update one worker's record.
    pub fn upsert(&mut self, workload: WorkerWorkload) {
        self.workloads.insert(workload.worker_id.clone(), workload);
    }

    /// Forget a deprovisioned worker.
    pub fn remove(&mut self, worker_id: &str) -> Option<WorkerWorkload> {
        self.workloads.remove(worker_id)
    }

    /// Replace the tracked set with a fresh view from the resource manager.
    pub fn replace_all(&mut self, fresh: HashMap<WorkerId, WorkerWorkload>) -> TrackerDelta {
        let mut delta = TrackerDelta::default();
        for id in self.workloads.keys() {
            if !fresh.contains_key(id) {
                delta.removed.push(id.clone());
            }
        }
        for id in fresh.keys() {
            if !self.workloads.contains_key(id) {
                delta.added.push(id.clone());
            }
        }
        delta.added.sort();
        delta.removed.sort();

        if !delta.is_empty() {
            debug!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                "worker set changed"
            );
        }
        self.workloads = fresh;
        delta
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerWorkload> {
        self.workloads.get(worker_id)
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerWorkload> {
        self.workloads.values()
    }

    /// Owned copy for readers outside the controller.
    pub fn snapshot(&self) -> HashMap<WorkerId, WorkerWorkload> {
        self.workloads.clone()
    }

    pub fn summary(&self) -> WorkloadSummary {
        let worker_count = self.workloads.len();
        let mut summary = WorkloadSummary {
            worker_count,
            ..Default::default()
        };
        if worker_count == 0 {
            return summary;
        }

        let mut utilization = 0.0;
        let mut latency = 0.0;
        for w in self.workloads.values() {
            summary.total_requests += w.current_requests;
            utilization += w.utilization;
            latency += w.average_latency_ms;
            *summary.by_priority.entry(w.priority).or_insert(0) += 1;
        }
        summary.mean_utilization = utilization / worker_count as f64;
        summary.mean_latency_ms = latency / worker_count as f64;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(id: &str, priority: Priority, requests: u64, utilization: f64) -> WorkerWorkload {
        WorkerWorkload {
            current_requests: requests,
            utilization,
            average_latency_ms: 100.0,
            ..WorkerWorkload::idle(id, priority)
        }
    }

    #[test]
    fn upsert_and_remove() {
        let mut tracker = WorkloadTracker::new();
        tracker.upsert(workload("w1", Priority::Low, 3, 0.2));
        tracker.upsert(workload("w1", Priority::Low, 7, 0.4));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("w1").unwrap().current_requests, 7);

        assert!(tracker.remove("w1").is_some());
        assert!(tracker.is_empty());
    }

    #[test]
    fn replace_all_reports_delta() {
        let mut tracker = WorkloadTracker::new();
        tracker.upsert(workload("w1", Priority::Low, 0, 0.0));
        tracker.upsert(workload("w2", Priority::Low, 0, 0.0));

        let fresh: HashMap<_, _> = ["w2", "w3"]
            .into_iter()
            .map(|id| (id.to_string(), workload(id, Priority::High, 1, 0.5)))
            .collect();
        let delta = tracker.replace_all(fresh);

        assert_eq!(delta.added, vec!["w3".to_string()]);
        assert_eq!(delta.removed, vec!["w1".to_string()]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get("w2").unwrap().priority, Priority::High);
    }

    #[test]
    fn summary_aggregates() {
        let mut tracker = WorkloadTracker::new();
        tracker.upsert(workload("w1", Priority::Low, 10, 0.2));
        tracker.upsert(workload("w2", Priority::Critical, 30, 0.6));

        let s = tracker.summary();
        assert_eq!(s.worker_count, 2);
        assert_eq!(s.total_requests, 40);
        assert!((s.mean_utilization - 0.4).abs() < 1e-9);
        assert_eq!(s.by_priority.get(&Priority::Critical), Some(&1));
        assert_eq!(s.by_priority.get(&Priority::Medium), None);
    }

    #[test]
    fn summary_of_empty_tracker() {
        let s = WorkloadTracker::new().summary();
        assert_eq!(s.worker_count, 0);
        assert_eq!(s.mean_utilization, 0.0);
    }
}
