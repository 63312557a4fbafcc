//! Core of the texture batch converter
//!
//! This crate provides everything below the command line:
//! - Asset scanning over one or more (separator-joined) roots
//! - Duplicate resolution by extension priority
//! - The drain-only job queue and the worker pool
//! - The dispatcher facade with progress, events and cooperative stop
//! - Built-in output format registry and the external process runner
//! - Logging, configuration and run reporting

pub mod batch;
pub mod common_utils;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod process;
pub mod queue;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod thread_manager;
pub mod worker;

pub use batch::{JobOutcome, RunTally, TallySnapshot};
pub use config::DispatchConfig;
pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatchRequest, Dispatcher, PreparedRun, RunHandle,
    RunProgress, RunSummary, StopHandle,
};
pub use errors::{ConfigError, ProcessError};
pub use logging::{init_logging, LogConfig};
pub use queue::{JobQueue, Take};
pub use registry::{CommandPlan, ConversionCommand, FormatRegistry, BUILTIN_COMMANDS};
pub use report::print_run_summary;
pub use resolver::{resolve_duplicates, GroupOutcome, Resolution};
pub use scanner::{scan_roots, ScanResult};
pub use thread_manager::{default_worker_count, max_worker_count, resolve_worker_count};
pub use worker::{ExitReason, RunEvent, RunState, RunStatus, WorkerHandle};
