//! Run Tallies
//!
//! Per-run counters updated concurrently by every worker. Each finished job
//! bumps `completed` once plus exactly one of `succeeded`, `failed` or
//! `skipped`, so `completed == succeeded + failed + skipped` once the
//! workers are quiet.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    /// The command exited with status 0.
    Succeeded,
    /// Non-zero exit, spawn error, or timeout.
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
    /// The command needed no conversion for this file.
    Skipped,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

#[derive(Debug, Default)]
pub struct RunTally {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one finished job and returns the new `completed` value.
    ///
    /// The returned value is unique per call, so exactly one caller sees the
    /// value equal to the run total.
    pub fn record(&self, outcome: &JobOutcome) -> usize {
        let bucket = match outcome {
            JobOutcome::Succeeded => &self.succeeded,
            JobOutcome::Failed { .. } => &self.failed,
            JobOutcome::Skipped => &self.skipped,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            completed: self.completed.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`RunTally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TallySnapshot {
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TallySnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.completed as f64) * 100.0
        }
    }
}
