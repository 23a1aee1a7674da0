//! Child process plumbing shared by the command-driven executors.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{Error, FailureClass, Result};

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Classify a failed command from its stderr.
pub fn classify_stderr(stderr: &str) -> FailureClass {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no space left") || lower.contains("disk quota exceeded") {
        FailureClass::Storage
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        FailureClass::Unauthorized
    } else {
        FailureClass::Transient
    }
}

fn exit_error(program: &str, status: ExitStatus, stderr: &str) -> Error {
    let msg = match status.code() {
        Some(code) => format!("{} exited with code {}: {}", program, code, stderr.trim()),
        None => format!("{} terminated by signal: {}", program, stderr.trim()),
    };
    match classify_stderr(stderr) {
        FailureClass::Storage => Error::storage(msg),
        FailureClass::Unauthorized => Error::unauthorized(msg),
        _ => Error::transient(msg),
    }
}

/// Run `command` to completion, feeding each stdout line to `on_line`.
///
/// The child is killed when `cancel` fires, yielding [`Error::Cancelled`].
/// Returns every stdout line on a zero exit.
pub async fn run_command<F>(
    mut command: Command,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<Vec<String>>
where
    F: FnMut(&str) + Send,
{
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::Other(format!("Failed to spawn {}: {}", program, e)))?;
    debug!(program = %program, pid = ?child.id(), "Spawned process");

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(line = %line, "stderr");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        })
    });

    let mut stdout_lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(program = %program, error = %e, "Failed to kill process");
                    }
                    return Err(Error::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        stdout_lines.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(program = %program, error = %e, "Failed to read stdout");
                        break;
                    }
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill process");
            }
            return Err(Error::Cancelled);
        }
        status = child.wait() => status?,
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        Ok(stdout_lines)
    } else {
        Err(exit_error(&program, status, &stderr))
    }
}
