use super::failure_result;
use dockhand_core::{OperationResult, Result};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::debug;

/// Grace period between SIGTERM and SIGKILL when a live process is closed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipe {
    Stdout,
    Stderr,
}

/// A running compose invocation whose output is read line by line.
///
/// Lines from each pipe arrive in the order the process wrote them. Dropping
/// a `LiveProcess` kills the subprocess; [`LiveProcess::close`] also reaps it.
#[derive(Debug)]
pub struct LiveProcess {
    name: String,
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
    stderr_text: String,
    started: Instant,
}

impl LiveProcess {
    pub(crate) fn new(name: String, mut child: Child) -> Self {
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        Self {
            name,
            child,
            stdout,
            stderr,
            stderr_text: String::new(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next output line from either pipe, or `None` once both are exhausted.
    pub async fn next_line(&mut self) -> Option<(Pipe, String)> {
        loop {
            let (pipe, line) = match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (None, None) => return None,
                (Some(out), None) => (Pipe::Stdout, out.next_line().await),
                (None, Some(err)) => (Pipe::Stderr, err.next_line().await),
                (Some(out), Some(err)) => tokio::select! {
                    line = out.next_line() => (Pipe::Stdout, line),
                    line = err.next_line() => (Pipe::Stderr, line),
                },
            };

            match line {
                Ok(Some(line)) => {
                    if pipe == Pipe::Stderr {
                        self.stderr_text.push_str(&line);
                        self.stderr_text.push('\n');
                    }
                    return Some((pipe, line));
                }
                Ok(None) | Err(_) => match pipe {
                    Pipe::Stdout => self.stdout = None,
                    Pipe::Stderr => self.stderr = None,
                },
            }
        }
    }

    /// Waits for the process to exit and builds its result.
    ///
    /// Call after [`LiveProcess::next_line`] returned `None`.
    pub async fn finish(mut self) -> Result<OperationResult> {
        let status = self.child.wait().await?;
        let duration = self.started.elapsed();
        debug!("{} exited with {:?} after {:?}", self.name, status.code(), duration);

        let stderr = std::mem::take(&mut self.stderr_text);
        if status.success() {
            Ok(
                OperationResult::success(format!("{} completed", self.name), duration)
                    .with_output(String::new(), stderr, status.code()),
            )
        } else {
            Ok(failure_result(&self.name, String::new(), stderr, status.code(), duration))
        }
    }

    /// Terminates and reaps the process.
    pub async fn close(mut self) {
        debug!("Closing live process {}", self.name);
        dockhand_utils::process::terminate(&mut self.child, &self.name, CLOSE_GRACE).await;
    }
}
