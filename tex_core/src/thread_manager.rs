//! Worker count selection
//!
//! Each worker spends its time blocked on an external converter that is
//! usually multi-threaded itself, so the default leaves most cores to the
//! converters.

use std::sync::OnceLock;
use tracing::warn;

/// Cached logical CPU count for this system
static CPU_COUNT: OnceLock<usize> = OnceLock::new();

fn cpu_count() -> usize {
    *CPU_COUNT.get_or_init(|| num_cpus::get().max(1))
}

/// Roughly one third of the logical CPUs, at least 1.
pub fn default_worker_count() -> usize {
    worker_share(cpu_count())
}

/// Upper bound for a user-selected worker count: one per logical CPU.
pub fn max_worker_count() -> usize {
    cpu_count()
}

fn worker_share(cpus: usize) -> usize {
    (cpus / 3).max(1)
}

/// Clamps a requested worker count into `1..=max_worker_count()`.
///
/// `None` selects [`default_worker_count`].
pub fn resolve_worker_count(requested: Option<usize>) -> usize {
    clamp_workers(requested, cpu_count())
}

fn clamp_workers(requested: Option<usize>, cpus: usize) -> usize {
    let Some(requested) = requested else {
        return worker_share(cpus);
    };
    let clamped = requested.clamp(1, cpus);
    if clamped != requested {
        warn!(
            requested,
            using = clamped,
            max = cpus,
            "Worker count out of range, clamping"
        );
    }
    clamped
}
