//! Terminal progress for a conversion run, fed from the run's event stream.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tex_core::{JobOutcome, RunEvent, RunStatus, RunSummary};

pub mod templates {
    pub const RUN: &str = "{spinner:.green} {prefix:.cyan.bold} ▕{bar:35.green/black}▏ {percent:>3}% done ({pos} / {len} textures) • ⏱️ {elapsed_precise} • {msg}";
    pub const PROGRESS_CHARS: &str = "█▓░";
    pub const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
}

pub struct RunProgressBar {
    bar: ProgressBar,
}

impl RunProgressBar {
    pub fn new(total: usize, prefix: &str) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template(templates::RUN)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars(templates::PROGRESS_CHARS)
            .tick_chars(templates::SPINNER_CHARS);
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));
        Self { bar }
    }

    /// A bar that draws nothing.
    #[cfg(test)]
    pub fn hidden(total: usize) -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::hidden()),
        }
    }

    #[cfg(test)]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::JobCompleted { path, outcome, .. } => {
                self.bar.inc(1);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if let JobOutcome::Failed { reason, .. } = outcome {
                    self.bar
                        .suspend(|| eprintln!("❌ {} ({})", path.display(), reason));
                }
                self.bar.set_message(name);
            }
            RunEvent::Stopped { .. } => {
                self.bar
                    .set_message("stopping, waiting for running conversions...");
            }
            RunEvent::WorkerExited { .. } | RunEvent::Finished { .. } => {}
        }
    }

    pub fn finish(&self, summary: &RunSummary) {
        match summary.state {
            RunStatus::Finished => self.bar.finish_with_message("done"),
            _ => self.bar.abandon_with_message("stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_bar_counts_every_completed_job() {
        let bar = RunProgressBar::hidden(3);
        bar.on_event(&RunEvent::JobCompleted {
            worker_id: 1,
            path: PathBuf::from("/t/a.png"),
            outcome: JobOutcome::Succeeded,
        });
        bar.on_event(&RunEvent::JobCompleted {
            worker_id: 2,
            path: PathBuf::from("/t/b.png"),
            outcome: JobOutcome::Skipped,
        });
        bar.on_event(&RunEvent::JobCompleted {
            worker_id: 1,
            path: PathBuf::from("/t/c.png"),
            outcome: JobOutcome::Failed {
                exit_code: Some(1),
                reason: "exit status 1".into(),
            },
        });
        bar.on_event(&RunEvent::Finished {
            elapsed: Duration::from_secs(1),
        });
        assert_eq!(bar.position(), 3);
    }

    #[test]
    fn test_non_job_events_do_not_move_bar() {
        let bar = RunProgressBar::hidden(2);
        bar.on_event(&RunEvent::Stopped {
            completed: 0,
            total: 2,
        });
        bar.on_event(&RunEvent::WorkerExited {
            worker_id: 1,
            reason: tex_core::ExitReason::Stopped,
        });
        assert_eq!(bar.position(), 0);
    }
}
