use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before any conversion job starts.
///
/// Fatal to one dispatch call only; nothing has been spawned when these are
/// returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No path specified")]
    EmptyRoots,

    #[error("No input formats selected")]
    NoInputFormats,

    #[error("No conversion commands available (none of the required executables were found)")]
    EmptyRegistry,

    #[error("Unknown output format: {0}")]
    UnknownCommand(String),

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Paths separator must not be empty")]
    EmptySeparator,

    #[error("Failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures running a single external conversion program.
///
/// Never escapes a worker: the job is logged and counted as failed.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture output of {program}")]
    CaptureOutput { program: String },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
