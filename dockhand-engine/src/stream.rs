use crate::executor::LiveProcess;
use dockhand_core::{Error, OperationResult};
use std::future::Future;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A running streaming operation.
///
/// Output lines arrive in the order the process wrote them on a bounded
/// queue; a slow consumer stalls the producer. The terminal result is
/// available exactly once, after the line queue has closed. Cancelling or
/// dropping the stream kills the subprocess.
#[derive(Debug)]
pub struct OperationStream {
    logs: mpsc::Receiver<String>,
    result: mpsc::Receiver<OperationResult>,
    cancel: CancellationToken,
}

impl OperationStream {
    /// Spawns the producer task for `live`.
    ///
    /// `finished` runs once the process is gone, before the result is sent.
    pub(crate) fn spawn<F>(live: LiveProcess, buffer: usize, finished: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (log_tx, logs) = mpsc::channel(buffer.max(1));
        let (result_tx, result) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        tokio::spawn(produce(live, log_tx, result_tx, cancel.clone(), finished));

        Self {
            logs,
            result,
            cancel,
        }
    }

    /// Next output line, or `None` once the process output is exhausted.
    pub async fn next_line(&mut self) -> Option<String> {
        self.logs.recv().await
    }

    /// The terminal result.
    ///
    /// Lines not yet read are discarded first. Returns `None` on every call
    /// after the first.
    pub async fn result(&mut self) -> Option<OperationResult> {
        while self.logs.recv().await.is_some() {}
        self.result.recv().await
    }

    /// Requests termination of the underlying process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for OperationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn produce<F>(
    mut live: LiveProcess,
    log_tx: mpsc::Sender<String>,
    result_tx: mpsc::Sender<OperationResult>,
    cancel: CancellationToken,
    finished: F,
) where
    F: Future<Output = ()>,
{
    let started = Instant::now();
    let mut lines = 0usize;

    let completed = loop {
        tokio::select! {
            () = cancel.cancelled() => break false,
            line = live.next_line() => match line {
                Some((_, line)) => {
                    lines += 1;
                    tokio::select! {
                        () = cancel.cancelled() => break false,
                        sent = log_tx.send(line) => if sent.is_err() {
                            break false;
                        },
                    }
                }
                None => break true,
            },
        }
    };
    drop(log_tx);

    let name = live.name().to_string();
    let result = if completed {
        match live.finish().await {
            Ok(result) => result,
            Err(e) => OperationResult::failure(e, started.elapsed()),
        }
    } else {
        info!("Cancelling {}", name);
        live.close().await;
        OperationResult::failure(Error::cancelled(&name), started.elapsed())
    };
    debug!(
        "{} streamed {} line(s), success: {}",
        name, lines, result.success
    );

    finished.await;
    if result_tx.send(result).await.is_err() {
        debug!("Result of {} was not collected", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandExecutor, ComposeVariant};
    use dockhand_core::Project;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn live(dir: &TempDir, body: &str) -> LiveProcess {
        let executor =
            CommandExecutor::with_variant(ComposeVariant::custom("sh", ["-c", body, "compose"]));
        executor
            .spawn_live(&Project::new("web", dir.path()), &["up".to_string()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lines_arrive_in_order_before_the_result() {
        let dir = TempDir::new().unwrap();
        let process = live(&dir, "i=1; while [ $i -le 150 ]; do echo line $i; i=$((i+1)); done").await;
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let mut stream = OperationStream::spawn(process, 100, async move {
            flag.store(true, Ordering::SeqCst);
        });

        let mut received = Vec::new();
        while let Some(line) = stream.next_line().await {
            received.push(line);
        }
        let expected: Vec<String> = (1..=150).map(|i| format!("line {i}")).collect();
        assert_eq!(received, expected);

        let result = stream.result().await.unwrap();
        assert!(result.success);
        assert!(finished.load(Ordering::SeqCst));
        assert!(stream.result().await.is_none());
    }

    #[tokio::test]
    async fn failure_result_follows_stderr_lines() {
        let dir = TempDir::new().unwrap();
        let process = live(&dir, "echo 'pull access denied for shop/api' >&2; exit 1").await;
        let mut stream = OperationStream::spawn(process, 4, async {});

        assert_eq!(
            stream.next_line().await.as_deref(),
            Some("pull access denied for shop/api")
        );
        let result = stream.result().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(
            result.error.unwrap().kind,
            dockhand_core::ErrorKind::Image
        );
    }

    #[tokio::test]
    async fn cancel_terminates_the_process() {
        let dir = TempDir::new().unwrap();
        let process = live(&dir, "echo started; exec sleep 30").await;
        let mut stream = OperationStream::spawn(process, 10, async {});

        assert_eq!(stream.next_line().await.as_deref(), Some("started"));
        stream.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), stream.result())
            .await
            .unwrap()
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("cancelled"));
    }
}
