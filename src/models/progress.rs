use serde::Serialize;

use crate::models::job::JobResult;

/// Aggregate counters for one batch run, mutated by workers as jobs move
/// through the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub completed: usize,
    pub success: usize,
    pub error: usize,
    pub pending: usize,
    pub active: usize,
}

impl BatchStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            pending: total,
            ..Self::default()
        }
    }

    /// Point-in-time view handed to progress callbacks.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let percentage = if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        };
        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            success: self.success,
            error: self.error,
            pending: self.pending,
            active: self.active,
            percentage,
        }
    }
}

/// Immutable progress snapshot emitted after every counter transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub success: usize,
    pub error: usize,
    pub pending: usize,
    pub active: usize,
    pub percentage: f64,
}

/// Final report handed back when a batch run resolves.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
    pub stats: ProgressSnapshot,
}

impl BatchReport {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            stats: BatchStats::new(0).snapshot(),
        }
    }
}
