//! The long-running `nvidia-smi dmon` child process.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors managing the sampling process.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// A running sampler whose stdout is delivered line by line.
///
/// stdout is read on its own task into a bounded channel, so the consumer
/// can `select!` on [`next_line`](Self::next_line) alongside other events.
/// stderr lines are logged at warn level. The child is killed if the
/// monitor is dropped.
#[derive(Debug)]
pub struct DmonMonitor {
    child: Child,
    lines: mpsc::Receiver<String>,
    readers: [JoinHandle<()>; 2],
}

impl DmonMonitor {
    /// Start `command args...`.
    pub fn spawn(command: &str, args: &[String], line_buffer: usize) -> Result<Self, MonitorError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MonitorError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(MonitorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(MonitorError::MissingPipe("stderr"))?;

        tracing::info!(command, ?args, pid = child.id(), "Started GPU sampler");

        let (tx, rx) = mpsc::channel(line_buffer.max(1));
        let stdout_task = tokio::spawn(forward_lines(stdout, tx));
        let stderr_task = tokio::spawn(log_stderr(stderr));

        Ok(Self {
            child,
            lines: rx,
            readers: [stdout_task, stderr_task],
        })
    }

    /// OS process id, while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next stdout line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Stop the child: SIGTERM, wait up to `timeout`, then kill.
    pub async fn terminate(mut self, timeout: Duration) -> Result<ExitStatus, MonitorError> {
        if let Some(status) = self.child.try_wait().map_err(MonitorError::Wait)? {
            tracing::debug!(%status, "GPU sampler already exited");
            self.abort_readers();
            return Ok(status);
        }

        if let Some(pid) = self.child.id() {
            send_sigterm(pid).await;
        }

        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map_err(MonitorError::Wait)?,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "GPU sampler ignored SIGTERM; killing"
                );
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill GPU sampler");
                }
                self.child.wait().await.map_err(MonitorError::Wait)?
            }
        };

        self.abort_readers();
        tracing::info!(%status, "GPU sampler stopped");
        Ok(status)
    }

    fn abort_readers(&self) {
        for task in &self.readers {
            task.abort();
        }
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) {
    let result = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(status) if status.success() => tracing::debug!(pid, "Sent SIGTERM to GPU sampler"),
        Ok(status) => tracing::debug!(pid, %status, "kill -TERM failed"),
        Err(e) => tracing::warn!(pid, error = %e, "Failed to run kill"),
    }
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32) {}

/// Read `reader` line by line into `tx` until EOF or the receiver is gone.
///
/// Bytes are decoded lossily so one bad byte does not end the stream.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("GPU sampler stdout closed");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read GPU sampler output");
                break;
            }
        }
    }
}

async fn log_stderr<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => tracing::warn!(stderr = %line.trim(), "GPU sampler"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading GPU sampler stderr");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_lines_then_end_of_stream() {
        let mut monitor = DmonMonitor::spawn("sh", &sh("printf '# gpu\\r\\n0\\n1'"), 4).unwrap();

        assert_eq!(monitor.next_line().await.as_deref(), Some("# gpu"));
        assert_eq!(monitor.next_line().await.as_deref(), Some("0"));
        assert_eq!(monitor.next_line().await.as_deref(), Some("1"));
        assert_eq!(monitor.next_line().await, None);

        let status = monitor.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_stderr_does_not_reach_lines() {
        let mut monitor =
            DmonMonitor::spawn("sh", &sh("echo warn >&2; echo data"), 4).unwrap();
        assert_eq!(monitor.next_line().await.as_deref(), Some("data"));
        assert_eq!(monitor.next_line().await, None);
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let mut monitor =
            DmonMonitor::spawn("sh", &sh("echo ready; exec sleep 30"), 4).unwrap();
        assert_eq!(monitor.next_line().await.as_deref(), Some("ready"));
        assert!(monitor.id().is_some());

        let status = tokio::time::timeout(
            Duration::from_secs(10),
            monitor.terminate(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_kills_child_ignoring_sigterm() {
        let mut monitor = DmonMonitor::spawn(
            "sh",
            &sh("trap '' TERM; echo ready; while true; do sleep 1; done"),
            4,
        )
        .unwrap();
        assert_eq!(monitor.next_line().await.as_deref(), Some("ready"));

        let status = tokio::time::timeout(
            Duration::from_secs(10),
            monitor.terminate(Duration::from_millis(300)),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = DmonMonitor::spawn("/nonexistent/nvidia-smi", &[], 4).unwrap_err();
        assert!(matches!(err, MonitorError::Spawn { .. }));
    }
}
