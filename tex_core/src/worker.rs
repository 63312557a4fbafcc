//! Worker Pool
//!
//! Every worker of a run loops independently: check the stop flag, take one
//! path from the shared [`JobQueue`], convert it, report it. An empty queue
//! ends the loop; so does an observed stop flag. Failing conversions are
//! logged and counted, never retried.
//!
//! Shared mutable state is limited to the queue, the stop flag and the
//! atomic counters inside [`RunState`].

use crate::batch::{JobOutcome, RunTally, TallySnapshot};
use crate::common_utils::format_command_line;
use crate::logging::{log_conversion, log_skip};
use crate::process::run_conversion;
use crate::queue::{JobQueue, Take};
use crate::registry::{CommandPlan, ConversionCommand};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    /// Every job completed.
    Finished,
    /// `stop()` was called before the last job completed.
    Stopped,
}

impl RunStatus {
    fn as_u8(self) -> u8 {
        match self {
            RunStatus::Running => 0,
            RunStatus::Finished => 1,
            RunStatus::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunStatus::Finished,
            2 => RunStatus::Stopped,
            _ => RunStatus::Running,
        }
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    QueueEmpty,
    Stopped,
    /// The worker thread unwound; its in-flight job is not counted.
    Panicked,
}

/// Events published on a run's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// One per attempted job, whatever its outcome.
    JobCompleted {
        worker_id: usize,
        path: PathBuf,
        outcome: JobOutcome,
    },
    WorkerExited {
        worker_id: usize,
        reason: ExitReason,
    },
    /// Sent once, when `completed` reaches `total`.
    Finished { elapsed: Duration },
    /// Sent once, when a stop request wins over natural completion.
    Stopped { completed: usize, total: usize },
}

/// Shared state of one run, created per dispatch.
#[derive(Debug)]
pub struct RunState {
    total: usize,
    tally: RunTally,
    stop: AtomicBool,
    status: AtomicU8,
    exited_workers: AtomicUsize,
    started: Instant,
    finished_after: OnceLock<Duration>,
    events: Sender<RunEvent>,
}

impl RunState {
    /// Creates the state and the receiving end of its event stream.
    pub fn new(total: usize) -> (Arc<Self>, Receiver<RunEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let state = Arc::new(Self {
            total,
            tally: RunTally::new(),
            stop: AtomicBool::new(false),
            status: AtomicU8::new(RunStatus::Running.as_u8()),
            exited_workers: AtomicUsize::new(0),
            started: Instant::now(),
            finished_after: OnceLock::new(),
            events,
        });
        (state, receiver)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.tally.completed()
    }

    pub fn tally(&self) -> TallySnapshot {
        self.tally.snapshot()
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Workers whose loop has ended, unwinding included.
    pub fn exited_workers(&self) -> usize {
        self.exited_workers.load(Ordering::Acquire)
    }

    /// Time to natural completion, or time so far.
    pub fn elapsed(&self) -> Duration {
        self.finished_after
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Raises the stop flag. Idempotent: only the call that moves the run
    /// out of `Running` publishes [`RunEvent::Stopped`] and returns true.
    pub fn request_stop(&self) -> bool {
        self.stop.store(true, Ordering::Release);
        if self.transition(RunStatus::Stopped) {
            let completed = self.completed();
            info!(completed, total = self.total, "Run stopped");
            self.publish(RunEvent::Stopped {
                completed,
                total: self.total,
            });
            true
        } else {
            false
        }
    }

    /// Marks a run that will never see a job (empty queue) as finished.
    pub(crate) fn finish_if_empty(&self) {
        if self.total == 0 {
            self.finish();
        }
    }

    /// Resolves a run whose workers are all gone but which is still
    /// `Running`; only reachable after a worker panic.
    pub(crate) fn settle(&self) {
        if self.status() != RunStatus::Running {
            return;
        }
        if self.completed() >= self.total {
            self.finish();
        } else {
            self.stop.store(true, Ordering::Release);
            self.transition(RunStatus::Stopped);
        }
    }

    fn record(&self, worker_id: usize, path: PathBuf, outcome: JobOutcome) {
        let completed = self.tally.record(&outcome);
        self.publish(RunEvent::JobCompleted {
            worker_id,
            path,
            outcome,
        });
        if completed == self.total {
            self.finish();
        }
    }

    fn finish(&self) {
        if self.transition(RunStatus::Finished) {
            let elapsed = self.started.elapsed();
            let _ = self.finished_after.set(elapsed);
            info!(
                total = self.total,
                elapsed_secs = elapsed.as_secs_f64(),
                "Run finished"
            );
            self.publish(RunEvent::Finished { elapsed });
        }
    }

    fn transition(&self, to: RunStatus) -> bool {
        self.status
            .compare_exchange(
                RunStatus::Running.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn publish(&self, event: RunEvent) {
        // Nobody listening is fine; counters stay authoritative.
        let _ = self.events.send(event);
    }
}

/// One worker's view of a run.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: usize,
    queue: Arc<JobQueue>,
    command: ConversionCommand,
    run: Arc<RunState>,
    timeout: Option<Duration>,
}

impl WorkerHandle {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        command: ConversionCommand,
        run: Arc<RunState>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            queue,
            command,
            run,
            timeout,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Drains the queue until it is empty or the stop flag is seen.
    pub fn run(self) -> ExitReason {
        let mut guard = ExitGuard::new(self.id, Arc::clone(&self.run));
        let reason = loop {
            if self.run.stop_requested() {
                break ExitReason::Stopped;
            }
            match self.queue.take() {
                Take::Empty => break ExitReason::QueueEmpty,
                Take::Job(path) => {
                    let outcome = self.convert(&path);
                    self.run.record(self.id, path, outcome);
                }
            }
        };
        guard.reason = reason;
        reason
    }

    fn convert(&self, path: &Path) -> JobOutcome {
        let argv = match self.command.plan(path) {
            CommandPlan::Skip => {
                log_skip(self.id, path);
                return JobOutcome::Skipped;
            }
            CommandPlan::Run(argv) => argv,
        };

        let command_line = format_command_line(&argv);
        match run_conversion(&argv, self.timeout) {
            Ok(output) => {
                log_conversion(
                    self.id,
                    &command_line,
                    &output.combined(),
                    output.exit_code,
                    output.duration,
                );
                if output.success() {
                    JobOutcome::Succeeded
                } else if output.timed_out {
                    JobOutcome::Failed {
                        exit_code: None,
                        reason: "timed out".to_string(),
                    }
                } else {
                    JobOutcome::Failed {
                        exit_code: output.exit_code,
                        reason: match output.exit_code {
                            Some(code) => format!("exit status {}", code),
                            None => "terminated by signal".to_string(),
                        },
                    }
                }
            }
            Err(e) => {
                error!(
                    worker_id = self.id,
                    command = %command_line,
                    error = %e,
                    "Conversion could not be run"
                );
                JobOutcome::Failed {
                    exit_code: None,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Publishes `WorkerExited` however the worker loop ends, unwinding included.
struct ExitGuard {
    worker_id: usize,
    run: Arc<RunState>,
    reason: ExitReason,
}

impl ExitGuard {
    fn new(worker_id: usize, run: Arc<RunState>) -> Self {
        Self {
            worker_id,
            run,
            reason: ExitReason::Panicked,
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        debug!(worker_id = self.worker_id, reason = ?self.reason, "Worker exited");
        self.run.publish(RunEvent::WorkerExited {
            worker_id: self.worker_id,
            reason: self.reason,
        });
        self.run.exited_workers.fetch_add(1, Ordering::AcqRel);
    }
}

/// Builds the rayon pool for one run and starts `worker_count` workers on it.
///
/// Worker ids start at 1. A run is over once
/// [`RunState::exited_workers`] reaches `worker_count`.
pub fn spawn_workers(
    worker_count: usize,
    queue: Arc<JobQueue>,
    command: &ConversionCommand,
    run: &Arc<RunState>,
    timeout: Option<Duration>,
) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .thread_name(|i| format!("tex-worker-{}", i + 1))
        .panic_handler(|_| error!("Conversion worker panicked"))
        .build()?;

    for id in 1..=worker_count {
        let worker = WorkerHandle::new(
            id,
            Arc::clone(&queue),
            command.clone(),
            Arc::clone(run),
            timeout,
        );
        pool.spawn(move || {
            worker.run();
        });
    }
    Ok(pool)
}
