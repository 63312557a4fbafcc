//! External Process Runner
//!
//! Runs one conversion program to completion and captures what it printed.
//!
//! Both stdout and stderr are piped, so each is drained on its own reader
//! thread: a tool that fills one pipe buffer while we block reading the other
//! would otherwise never exit.
//!
//! On Unix the child leads its own process group. A timeout kills the whole
//! group, so launcher scripts take their helpers down with them.

use crate::common_utils::format_command_line;
use crate::errors::ProcessError;
use crossbeam_channel::{bounded, Receiver};
use std::ffi::OsString;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a timed run checks whether the child has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the pipe readers get after a timeout kill before they are
/// abandoned with whatever they had not delivered.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Captured result of one external program run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal (or by the timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout and stderr merged for the per-job log record.
    pub fn combined(&self) -> String {
        if !self.stdout.is_empty() && !self.stderr.is_empty() {
            format!("STDOUT:\n{}\n\nSTDERR:\n{}", self.stdout, self.stderr)
        } else if !self.stdout.is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

/// Spawns `argv[0]` with the remaining arguments and waits for it.
///
/// With `timeout` set, a child still alive after that long is killed and the
/// output is returned with `timed_out = true`. Without it the call blocks for
/// as long as the program runs.
pub fn run_conversion(
    argv: &[OsString],
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;
    let program_name = program.to_string_lossy().to_string();

    debug!(command = %format_command_line(argv), "Spawning conversion");

    let start = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program_name.clone(),
            source,
        })?;

    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());
    let (stdout_reader, stderr_reader) = match (stdout_reader, stderr_reader) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            kill_process_tree(&mut child);
            let _ = child.wait();
            return Err(ProcessError::CaptureOutput {
                program: program_name,
            });
        }
    };

    let (status, timed_out) = match timeout {
        Some(limit) => wait_with_timeout(&mut child, limit, &program_name)?,
        None => {
            let status = child.wait().map_err(|source| ProcessError::Wait {
                program: program_name.clone(),
                source,
            })?;
            (status, false)
        }
    };

    let (stdout, stderr) = if timed_out {
        // A grandchild outside the group may still hold the pipes open.
        let deadline = Instant::now() + READER_GRACE;
        (
            collect_until(&stdout_reader, deadline),
            collect_until(&stderr_reader, deadline),
        )
    } else {
        (
            stdout_reader.recv().unwrap_or_default(),
            stderr_reader.recv().unwrap_or_default(),
        )
    };

    Ok(ProcessOutput {
        exit_code: if timed_out { None } else { status.code() },
        stdout,
        stderr,
        duration: start.elapsed(),
        timed_out,
    })
}

/// Reads `pipe` to EOF on a detached thread and sends the text back once.
fn drain<R>(pipe: Option<R>) -> Option<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let mut pipe = pipe?;
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    Some(rx)
}

fn collect_until(reader: &Receiver<String>, deadline: Instant) -> String {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match reader.recv_timeout(remaining) {
        Ok(text) => text,
        Err(_) => {
            debug!("Pipe reader still blocked after kill, dropping its output");
            String::new()
        }
    }
}

/// Kills the child and, on Unix, every process left in its group.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall; a negative pid addresses the process group
            // the child leads, which was created at spawn.
            let ret = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if ret == 0 {
                return;
            }
            debug!(
                error = %std::io::Error::last_os_error(),
                "Process group kill failed, killing child only"
            );
        }
    }
    if let Err(e) = child.kill() {
        // Already exited between try_wait and kill.
        debug!(error = %e, "Kill after timeout failed");
    }
}

fn wait_with_timeout(
    child: &mut Child,
    limit: Duration,
    program: &str,
) -> Result<(ExitStatus, bool), ProcessError> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status, false)),
            Ok(None) if Instant::now() >= deadline => {
                warn!(
                    program = program,
                    timeout_secs = limit.as_secs_f64(),
                    "Conversion timed out, killing it"
                );
                kill_process_tree(child);
                let status = child.wait().map_err(|source| ProcessError::Wait {
                    program: program.to_string(),
                    source,
                })?;
                return Ok((status, true));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(ProcessError::Wait {
                    program: program.to_string(),
                    source,
                })
            }
        }
    }
}
