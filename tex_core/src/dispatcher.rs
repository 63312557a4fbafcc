//! Dispatcher
//!
//! Public entry point of a conversion run:
//!
//! 1. validate the request (roots, input formats, output command, workers)
//! 2. scan the roots and resolve duplicate assets
//! 3. let the caller confirm the resolved job count
//! 4. fill the job queue and start the worker pool
//!
//! The returned [`RunHandle`] reports progress, streams [`RunEvent`]s and
//! can stop the run. Conversion failures never surface here; they are
//! logged by the worker and show up only in the tallies.

use crate::common_utils::split_roots;
use crate::config::DispatchConfig;
use crate::errors::ConfigError;
use crate::queue::JobQueue;
use crate::registry::{ConversionCommand, FormatRegistry};
use crate::resolver::{resolve_duplicates, Resolution};
use crate::scanner::{scan_roots, ScanResult};
use crate::thread_manager::default_worker_count;
use crate::worker::{spawn_workers, RunEvent, RunState, RunStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const WAIT_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// What the caller wants converted.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Root directories; each entry may join several with the configured
    /// paths separator.
    pub roots: Vec<String>,
    /// Accepted suffixes. `None` uses the configured default selection.
    pub input_formats: Option<Vec<String>>,
    /// Registry name of the output command. `None` uses the configured default.
    pub output_command: Option<String>,
    pub worker_count: usize,
}

impl DispatchRequest {
    pub fn new<S: Into<String>>(roots: impl IntoIterator<Item = S>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            input_formats: None,
            output_command: None,
            worker_count: default_worker_count(),
        }
    }

    pub fn with_input_formats<S: AsRef<str>>(mut self, formats: &[S]) -> Self {
        self.input_formats = Some(formats.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub fn with_output_command(mut self, name: impl Into<String>) -> Self {
        self.output_command = Some(name.into());
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The scan resolved to zero jobs; no worker was started.
    NothingFound,
    /// The caller declined to convert `found` textures.
    Declined { found: usize },
    Started(RunHandle),
}

/// Owns the configuration and the command registry, and remembers the most
/// recently started run so it can be stopped from anywhere.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    registry: FormatRegistry,
    active: Mutex<Option<StopHandle>>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, registry: FormatRegistry) -> Self {
        Self {
            config: config.normalized(),
            registry,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Validates, scans and resolves without starting anything.
    pub fn prepare(&self, request: &DispatchRequest) -> Result<PreparedRun<'_>, ConfigError> {
        if self.registry.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let separator = self.config.paths_separator.as_str();
        if separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        let has_root = request
            .roots
            .iter()
            .any(|r| !split_roots(r, separator).is_empty());
        if !has_root {
            return Err(ConfigError::EmptyRoots);
        }

        let formats = request
            .input_formats
            .as_ref()
            .unwrap_or(&self.config.default_selected_formats);
        if formats.iter().all(|f| f.trim().is_empty()) {
            return Err(ConfigError::NoInputFormats);
        }

        if request.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        let command = self.select_command(request.output_command.as_deref())?;

        let scan = scan_roots(request.roots.as_slice(), separator, formats);
        let resolution = resolve_duplicates(scan.assets.iter().cloned(), &self.config.ext_priority);
        info!(
            found = scan.len(),
            jobs = resolution.kept.len(),
            dropped_duplicates = resolution.dropped_count(),
            unranked_groups = resolution.unranked_count(),
            command = command.name(),
            "Prepared conversion run"
        );

        Ok(PreparedRun {
            dispatcher: self,
            command: command.clone(),
            worker_count: request.worker_count,
            scan,
            resolution,
        })
    }

    /// Prepares the run, asks `confirm` with the job count and starts it on
    /// approval. `confirm` is not called when nothing was found.
    pub fn dispatch<F>(
        &self,
        request: &DispatchRequest,
        confirm: F,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        F: FnOnce(usize) -> bool,
    {
        let prepared = self.prepare(request)?;
        if prepared.is_empty() {
            info!("No textures found, nothing to convert");
            return Ok(DispatchOutcome::NothingFound);
        }
        let found = prepared.len();
        if !confirm(found) {
            info!(found, "Conversion declined");
            return Ok(DispatchOutcome::Declined { found });
        }
        Ok(DispatchOutcome::Started(prepared.start()?))
    }

    /// Stops the most recently started run. Returns false when there is
    /// none or it already ended.
    pub fn stop(&self) -> bool {
        let active = match self.active.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match active {
            Some(handle) => handle.stop(),
            None => {
                debug!("Stop requested with no active run");
                false
            }
        }
    }

    fn select_command(&self, requested: Option<&str>) -> Result<&ConversionCommand, ConfigError> {
        if let Some(name) = requested {
            return self
                .registry
                .get(name)
                .ok_or_else(|| ConfigError::UnknownCommand(name.to_string()));
        }
        let default = self.config.default_output_command.as_str();
        if let Some(command) = self.registry.get(default) {
            return Ok(command);
        }
        warn!(
            default,
            "Default output format is not available, using the first available one"
        );
        self.registry.commands().next().ok_or(ConfigError::EmptyRegistry)
    }

    fn register(&self, handle: StopHandle) {
        match self.active.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }
}

/// A validated, scanned and resolved run that has not started yet.
#[derive(Debug)]
pub struct PreparedRun<'d> {
    dispatcher: &'d Dispatcher,
    command: ConversionCommand,
    worker_count: usize,
    scan: ScanResult,
    resolution: Resolution,
}

impl PreparedRun<'_> {
    /// Number of jobs the run would start.
    pub fn len(&self) -> usize {
        self.resolution.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolution.kept.is_empty()
    }

    pub fn jobs(&self) -> &[PathBuf] {
        &self.resolution.kept
    }

    pub fn scan(&self) -> &ScanResult {
        &self.scan
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn command(&self) -> &ConversionCommand {
        &self.command
    }

    /// Fills the queue and starts the workers.
    pub fn start(self) -> Result<RunHandle, DispatchError> {
        let total = self.resolution.kept.len();
        let unresolved_groups = self.resolution.unranked_count();
        let dropped_duplicates = self.resolution.dropped_count();
        let queue = Arc::new(JobQueue::fill(self.resolution.kept));
        let (run, events) = RunState::new(total);

        info!(
            total,
            workers = self.worker_count,
            command = self.command.name(),
            "Starting conversion run"
        );

        let pool = spawn_workers(
            self.worker_count,
            queue,
            &self.command,
            &run,
            self.dispatcher.config.job_timeout(),
        )?;
        run.finish_if_empty();

        let handle = RunHandle {
            run,
            events,
            worker_count: self.worker_count,
            unresolved_groups,
            dropped_duplicates,
            _pool: pool,
        };
        self.dispatcher.register(handle.stop_handle());
        Ok(handle)
    }
}

/// Cloneable stop trigger for a run, e.g. for a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct StopHandle {
    run: Arc<RunState>,
}

impl StopHandle {
    /// Idempotent; true only for the call that actually stopped the run.
    pub fn stop(&self) -> bool {
        self.run.request_stop()
    }
}

/// `completed` out of `total` jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub completed: usize,
    pub total: usize,
}

impl RunProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Final account of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub state: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    /// Duplicate groups kept whole because no extension was ranked.
    pub unresolved_groups: usize,
    pub dropped_duplicates: usize,
}

/// A started run.
#[derive(Debug)]
pub struct RunHandle {
    run: Arc<RunState>,
    events: Receiver<RunEvent>,
    worker_count: usize,
    unresolved_groups: usize,
    dropped_duplicates: usize,
    _pool: rayon::ThreadPool,
}

impl RunHandle {
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            completed: self.run.completed(),
            total: self.run.total(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.run.status()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stop(&self) -> bool {
        self.run.request_stop()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            run: Arc::clone(&self.run),
        }
    }

    /// The run's event stream. Events taken here are not seen by
    /// [`RunHandle::wait_with`].
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    /// True once every worker has left its loop.
    pub fn is_done(&self) -> bool {
        self.run.exited_workers() >= self.worker_count
    }

    pub fn wait(self) -> RunSummary {
        self.wait_with(|_| {})
    }

    /// Blocks until every worker has exited, passing each event to
    /// `on_event` as it arrives.
    pub fn wait_with<F>(self, mut on_event: F) -> RunSummary
    where
        F: FnMut(&RunEvent),
    {
        loop {
            match self.events.recv_timeout(WAIT_POLL) {
                Ok(event) => on_event(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.is_done() {
                break;
            }
        }
        self.run.settle();
        for event in self.events.try_iter() {
            on_event(&event);
        }
        self.summary()
    }

    fn summary(&self) -> RunSummary {
        let tally = self.run.tally();
        RunSummary {
            state: self.run.status(),
            total: self.run.total(),
            completed: tally.completed,
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            elapsed: self.run.elapsed(),
            unresolved_groups: self.unresolved_groups,
            dropped_duplicates: self.dropped_duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::JobOutcome;
    use crate::registry::CommandPlan;
    use std::ffi::OsString;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn skip_command() -> ConversionCommand {
        ConversionCommand::new("Skip", "none", |_: &Path| CommandPlan::Skip)
    }

    fn shell_command(name: &str, script: &'static str) -> ConversionCommand {
        ConversionCommand::new(name, "sh", move |p: &Path| {
            CommandPlan::Run(vec![
                OsString::from("sh"),
                OsString::from("-c"),
                OsString::from(script),
                OsString::from("sh"),
                p.as_os_str().to_os_string(),
            ])
        })
    }

    fn dispatcher_with(commands: Vec<ConversionCommand>) -> Dispatcher {
        let config = DispatchConfig::default()
            .with_paths_separator("///")
            .with_ext_priority(&["jpg", "exr"]);
        Dispatcher::new(config, FormatRegistry::from_commands(commands))
    }

    fn texture_tree(count: usize) -> TempDir {
        let temp = TempDir::new().unwrap();
        for i in 0..count {
            touch(&temp.path().join(format!("set/tex_{:03}.png", i)));
        }
        temp
    }

    fn root_of(temp: &TempDir) -> String {
        temp.path().to_string_lossy().to_string()
    }

    #[test]
    fn test_overlapping_roots_resolve_to_preferred_asset() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("tex/a");
        let b = temp.path().join("tex/b");
        touch(&a.join("wood_2K_diff.jpg"));
        touch(&a.join("wood_2K_diff.exr"));
        fs::create_dir_all(&b).unwrap();

        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([
            a.to_string_lossy().to_string(),
            format!("{}///{}", b.display(), a.display()),
        ])
        .with_input_formats(&[".jpg", ".exr"])
        .with_output_command("Skip");

        let prepared = dispatcher.prepare(&request).unwrap();
        assert_eq!(prepared.jobs(), &[a.join("wood_2K_diff.exr")]);
        assert_eq!(prepared.resolution().dropped_count(), 1);
        assert_eq!(prepared.scan().len(), 2);
    }

    #[test]
    fn test_unnormalized_config_priority_still_ranks() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("wood_2K_diff.jpg"));
        touch(&temp.path().join("wood_2K_diff.exr"));

        let config = DispatchConfig {
            ext_priority: vec![".JPG".into(), " .EXR ".into()],
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(config, FormatRegistry::from_commands([skip_command()]));
        assert_eq!(dispatcher.config().ext_priority, vec!["jpg", "exr"]);

        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".jpg", ".exr"])
            .with_output_command("Skip");
        let prepared = dispatcher.prepare(&request).unwrap();
        assert_eq!(prepared.jobs(), &[temp.path().join("wood_2K_diff.exr")]);
        assert_eq!(prepared.resolution().dropped_count(), 1);
    }

    #[test]
    fn test_empty_roots_is_config_error() {
        let dispatcher = dispatcher_with(vec![skip_command()]);
        for roots in [vec![], vec!["".to_string()], vec!["  ///  ".to_string()]] {
            let request = DispatchRequest::new(roots).with_output_command("Skip");
            let mut confirmed = false;
            let result = dispatcher.dispatch(&request, |_| {
                confirmed = true;
                true
            });
            assert!(matches!(
                result,
                Err(DispatchError::Config(ConfigError::EmptyRoots))
            ));
            assert!(!confirmed);
        }
        assert!(!dispatcher.stop());
    }

    #[test]
    fn test_empty_input_formats_is_config_error() {
        let temp = texture_tree(1);
        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats::<&str>(&[])
            .with_output_command("Skip");
        assert!(matches!(
            dispatcher.prepare(&request),
            Err(ConfigError::NoInputFormats)
        ));
    }

    #[test]
    fn test_empty_registry_refused() {
        let temp = texture_tree(1);
        let dispatcher = Dispatcher::new(DispatchConfig::default(), FormatRegistry::default());
        let request = DispatchRequest::new([root_of(&temp)]);
        assert!(matches!(
            dispatcher.prepare(&request),
            Err(ConfigError::EmptyRegistry)
        ));
    }

    #[test]
    fn test_unknown_command_and_zero_workers() {
        let temp = texture_tree(1);
        let dispatcher = dispatcher_with(vec![skip_command()]);

        let unknown = DispatchRequest::new([root_of(&temp)]).with_output_command("Nope");
        assert!(matches!(
            dispatcher.prepare(&unknown),
            Err(ConfigError::UnknownCommand(name)) if name == "Nope"
        ));

        let zero = DispatchRequest::new([root_of(&temp)])
            .with_output_command("Skip")
            .with_worker_count(0);
        assert!(matches!(
            dispatcher.prepare(&zero),
            Err(ConfigError::InvalidWorkerCount)
        ));
    }

    #[test]
    fn test_missing_default_command_falls_back() {
        let temp = texture_tree(1);
        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([root_of(&temp)]).with_input_formats(&[".png"]);
        let prepared = dispatcher.prepare(&request).unwrap();
        assert_eq!(prepared.command().name(), "Skip");
    }

    #[test]
    fn test_nothing_found_skips_confirmation() {
        let temp = TempDir::new().unwrap();
        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([root_of(&temp)]).with_output_command("Skip");
        let outcome = dispatcher
            .dispatch(&request, |_| panic!("confirmation asked for zero jobs"))
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::NothingFound));
    }

    #[test]
    fn test_declined_starts_nothing() {
        let temp = texture_tree(3);
        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Skip");
        let outcome = dispatcher.dispatch(&request, |found| found == 0).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Declined { found: 3 }));
        assert!(!dispatcher.stop());
    }

    #[test]
    fn test_skip_run_finishes_exactly_once() {
        let temp = texture_tree(25);
        let dispatcher = dispatcher_with(vec![skip_command()]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Skip")
            .with_worker_count(4);

        let handle = match dispatcher.dispatch(&request, |_| true).unwrap() {
            DispatchOutcome::Started(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };

        let mut completed_events = 0;
        let mut finished_events = 0;
        let mut exited = 0;
        let summary = handle.wait_with(|event| match event {
            RunEvent::JobCompleted { outcome, .. } => {
                assert_eq!(*outcome, JobOutcome::Skipped);
                completed_events += 1;
            }
            RunEvent::Finished { .. } => finished_events += 1,
            RunEvent::WorkerExited { .. } => exited += 1,
            RunEvent::Stopped { .. } => panic!("run was not stopped"),
        });

        assert_eq!(summary.state, RunStatus::Finished);
        assert_eq!(summary.total, 25);
        assert_eq!(summary.completed, 25);
        assert_eq!(summary.skipped, 25);
        assert_eq!(completed_events, 25);
        assert_eq!(finished_events, 1);
        assert_eq!(exited, 4);
        // The run is over; stopping it changes nothing.
        assert!(!dispatcher.stop());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_still_counts_completed() {
        let temp = texture_tree(6);
        let dispatcher = dispatcher_with(vec![
            shell_command("Ok", "exit 0"),
            shell_command("Fail", "echo broken >&2; exit 2"),
        ]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Fail")
            .with_worker_count(2);

        let summary = dispatcher.prepare(&request).unwrap().start().unwrap().wait();
        assert_eq!(summary.state, RunStatus::Finished);
        assert_eq!(summary.completed, 6);
        assert_eq!(summary.failed, 6);
        assert_eq!(summary.succeeded, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command_counts_succeeded() {
        let temp = texture_tree(4);
        let dispatcher = dispatcher_with(vec![shell_command("Ok", "test -f \"$1\"")]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Ok")
            .with_worker_count(3);

        let summary = dispatcher.prepare(&request).unwrap().start().unwrap().wait();
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.completed, summary.total);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_is_idempotent_and_bounded() {
        let temp = texture_tree(20);
        let dispatcher = dispatcher_with(vec![shell_command("Slow", "sleep 0.3")]);
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Slow")
            .with_worker_count(2);

        let handle = match dispatcher.dispatch(&request, |_| true).unwrap() {
            DispatchOutcome::Started(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert!(dispatcher.stop());
        assert!(!handle.stop());
        assert!(!handle.stop_handle().stop());
        assert_eq!(handle.status(), RunStatus::Stopped);

        let mut stopped_events = 0;
        let summary = handle.wait_with(|event| {
            if matches!(event, RunEvent::Stopped { .. }) {
                stopped_events += 1;
            }
        });
        assert_eq!(summary.state, RunStatus::Stopped);
        assert_eq!(stopped_events, 1);
        assert!(summary.completed <= summary.total);
        assert!(summary.completed < 20);
        assert_eq!(
            summary.completed,
            summary.succeeded + summary.failed + summary.skipped
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_job_timeout_counts_failed() {
        let temp = texture_tree(1);
        let config = DispatchConfig::default().with_job_timeout(Some(Duration::from_secs(1)));
        let dispatcher = Dispatcher::new(
            config,
            FormatRegistry::from_commands([shell_command("Hang", "sleep 30; echo late")]),
        );
        let request = DispatchRequest::new([root_of(&temp)])
            .with_input_formats(&[".png"])
            .with_output_command("Hang")
            .with_worker_count(1);

        let summary = dispatcher.prepare(&request).unwrap().start().unwrap().wait();
        assert_eq!(summary.state, RunStatus::Finished);
        assert_eq!(summary.failed, 1);
        assert!(summary.elapsed < Duration::from_secs(10), "took {:?}", summary.elapsed);
    }

    #[test]
    fn test_progress_fraction() {
        let p = RunProgress {
            completed: 1,
            total: 4,
        };
        assert!((p.fraction() - 0.25).abs() < f64::EPSILON);
        assert!(
            (RunProgress {
                completed: 0,
                total: 0
            }
            .fraction()
                - 1.0)
                .abs()
                < f64::EPSILON
        );
    }
}
