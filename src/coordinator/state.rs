//! Coordinator bookkeeping: finished-task history and request metrics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::task::Task;

/// Bounded history of finished tasks, oldest evicted first
pub struct TaskLedger {
    tasks: RwLock<VecDeque<Task>>,
    limit: usize,
}

impl TaskLedger {
    pub fn new(limit: usize) -> Self {
        Self {
            tasks: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub async fn record(&self, finished: Vec<Task>) {
        let mut tasks = self.tasks.write().await;
        Self::append(&mut tasks, finished, self.limit);
    }

    /// Record without waiting; hands the tasks back if the history is locked
    pub fn try_record(&self, finished: Vec<Task>) -> std::result::Result<(), Vec<Task>> {
        match self.tasks.try_write() {
            Ok(mut tasks) => {
                Self::append(&mut tasks, finished, self.limit);
                Ok(())
            }
            Err(_) => Err(finished),
        }
    }

    fn append(tasks: &mut VecDeque<Task>, finished: Vec<Task>, limit: usize) {
        tasks.extend(finished);
        while tasks.len() > limit {
            tasks.pop_front();
        }
    }

    pub async fn get(&self, task_id: &Uuid) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks.iter().rev().find(|t| &t.id == task_id).cloned()
    }

    pub async fn contains_request(&self, request_id: &Uuid) -> bool {
        let tasks = self.tasks.read().await;
        tasks.iter().any(|t| &t.request_id == request_id)
    }

    /// Most recent first
    pub async fn recent(&self, n: usize) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        tasks.iter().rev().take(n).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

/// How a request ended, for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Partial,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Default)]
pub struct CoordinationMetrics {
    requests: AtomicU64,
    succeeded: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    unresolved_conflicts: AtomicU64,
    total_execution_ms: AtomicU64,
}

impl CoordinationMetrics {
    pub fn record(&self, outcome: RequestOutcome, execution_ms: u64, unresolved: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_execution_ms
            .fetch_add(execution_ms, Ordering::Relaxed);
        self.unresolved_conflicts
            .fetch_add(unresolved as u64, Ordering::Relaxed);
        let counter = match outcome {
            RequestOutcome::Succeeded => &self.succeeded,
            RequestOutcome::Partial => &self.partial,
            RequestOutcome::Failed => &self.failed,
            RequestOutcome::TimedOut => &self.timed_out,
            RequestOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total = self.total_execution_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            unresolved_conflicts: self.unresolved_conflicts.load(Ordering::Relaxed),
            average_execution_ms: if requests == 0 {
                0.0
            } else {
                total as f64 / requests as f64
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub unresolved_conflicts: u64,
    pub average_execution_ms: f64,
}
