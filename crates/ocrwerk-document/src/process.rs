// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scoped execution of external programs.
//
// Every child is spawned with `kill_on_drop`, so dropping the future that
// owns it (for example when a job is cancelled) terminates the process.
// A timeout kills the child explicitly and reaps it before returning.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Failure to run an external program to completion.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("program '{program}' not found")]
    NotFound { program: String },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {}s and was killed", limit.as_secs_f64())]
    Timeout { program: String, limit: Duration },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("I/O error talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Whether the child was terminated by a signal rather than exiting.
    pub fn was_signalled(&self) -> bool {
        matches!(self, Self::Failed { status, .. } if status.code().is_none())
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Resolve `program` on `PATH` (or as given, if it is a path).
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Run `program args...` to completion within `limit`, capturing stdout
/// and stderr. A non-zero exit status is an error.
#[instrument(skip(args, limit))]
pub async fn run<I, S>(program: &str, args: I, limit: Duration) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (status, output) = run_unchecked(program, args, limit).await?;
    if !status.success() {
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status,
            stderr: output.stderr_lossy().trim().to_string(),
        });
    }
    Ok(output)
}

/// Like [`run`], but returns the exit status instead of failing on a
/// non-zero exit.
pub async fn run_unchecked<I, S>(
    program: &str,
    args: I,
    limit: Duration,
) -> Result<(ExitStatus, ProcessOutput), ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let started = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound {
            program: program.to_string(),
        },
        _ => ProcessError::Spawn {
            program: program.to_string(),
            source,
        },
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let outcome = tokio::time::timeout(limit, async {
        tokio::join!(child.wait(), read_all(stdout), read_all(stderr))
    })
    .await;

    let io_err = |source| ProcessError::Io {
        program: program.to_string(),
        source,
    };

    match outcome {
        Ok((status, stdout, stderr)) => {
            let status = status.map_err(io_err)?;
            let output = ProcessOutput {
                stdout: stdout.map_err(io_err)?,
                stderr: stderr.map_err(io_err)?,
                elapsed: started.elapsed(),
            };
            debug!(%status, elapsed_ms = output.elapsed.as_millis() as u64, "Process finished");
            Ok((status, output))
        }
        Err(_) => {
            warn!(limit_s = limit.as_secs_f64(), "Process timed out; killing");
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "Failed to signal timed-out process");
            }
            let _ = child.wait().await;
            Err(ProcessError::Timeout {
                program: program.to_string(),
                limit,
            })
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}
