//! Worker process contract and the tokio-backed launcher.
//!
//! A launched worker is a [`WorkerHandle`] (stdin + kill switch) plus a
//! stream of [`WorkerEvent`]s: stdout and stderr chunks, then exactly one
//! `Exited` event once the process is gone and its pipes are drained.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffered stdin lines per worker.
const STDIN_BUFFER: usize = 32;

/// Buffered output events per worker.
const EVENT_BUFFER: usize = 256;

/// Read size for stdout/stderr chunks.
const READ_CHUNK: usize = 8 * 1024;

/// Everything needed to start one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the daemon's own environment.
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Output of a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Stdout(String),
    Stderr(String),
    /// Terminal event. `None` when the process was killed by a signal.
    Exited(Option<i32>),
}

/// Control side of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub const fn new(
        pid: Option<u32>,
        stdin_tx: mpsc::Sender<String>,
        kill_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            pid,
            stdin_tx,
            kill_tx: Some(kill_tx),
        }
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue one line for the worker's stdin. The newline is added by the
    /// writer.
    pub fn write_line(&self, line: &str) -> bool {
        match self.stdin_tx.try_send(line.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Failed to queue worker input");
                false
            }
        }
    }

    /// Forcefully terminate the worker. Only the first call has an effect.
    pub fn kill(&mut self) -> bool {
        self.kill_tx.take().is_some_and(|tx| tx.send(()).is_ok())
    }
}

/// A freshly launched worker.
#[derive(Debug)]
pub struct LaunchedWorker {
    pub handle: WorkerHandle,
    pub events: mpsc::Receiver<WorkerEvent>,
}

/// Errors from launching a worker.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to capture worker {0}")]
    MissingPipe(&'static str),
}

/// Starts worker processes.
///
/// `launch` is synchronous but must be called from within a tokio runtime:
/// implementations spawn background tasks to pump the worker's streams.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, spec: LaunchSpec) -> Result<LaunchedWorker, LaunchError>;
}

/// Launches real OS processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    /// How long to wait for stdout/stderr to drain after exit.
    drain_timeout: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: LaunchSpec) -> Result<LaunchedWorker, LaunchError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            program: spec.program.display().to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(LaunchError::MissingPipe("stdio"));
        };

        debug!(pid = ?pid, program = %spec.program.display(), "Worker process spawned");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(STDIN_BUFFER);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(write_stdin(stdin, stdin_rx, pid));
        let readers = [
            tokio::spawn(forward_stream(stdout, event_tx.clone(), WorkerEvent::Stdout)),
            tokio::spawn(forward_stream(stderr, event_tx.clone(), WorkerEvent::Stderr)),
        ];
        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            readers,
            event_tx,
            self.drain_timeout,
        ));

        Ok(LaunchedWorker {
            handle: WorkerHandle::new(pid, stdin_tx, kill_tx),
            events: event_rx,
        })
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>, pid: Option<u32>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!(pid = ?pid, "Failed to write to stdin: {}", e);
            break;
        }
        if let Err(e) = stdin.write_all(b"\n").await {
            error!(pid = ?pid, "Failed to write newline: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!(pid = ?pid, "Failed to flush stdin: {}", e);
            break;
        }
    }
}

async fn forward_stream<R>(
    mut reader: R,
    tx: mpsc::Sender<WorkerEvent>,
    wrap: fn(String) -> WorkerEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Worker stream read failed");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);
        let chunk = take_utf8_prefix(&mut pending);
        if !chunk.is_empty() && tx.send(wrap(chunk)).await.is_err() {
            return;
        }
    }
    if !pending.is_empty() {
        let _ = tx
            .send(wrap(String::from_utf8_lossy(&pending).into_owned()))
            .await;
    }
}

/// Take the longest decodable prefix of `buf`, leaving an incomplete
/// trailing UTF-8 sequence in place for the next read.
fn take_utf8_prefix(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(s) => {
            let out = s.to_string();
            buf.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = buf.split_off(valid);
            let out = String::from_utf8_lossy(buf).into_owned();
            *buf = rest;
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            out
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: [JoinHandle<()>; 2],
    event_tx: mpsc::Sender<WorkerEvent>,
    drain_timeout: Duration,
) {
    let pid = child.id();
    // A dropped handle does not kill the worker; only an explicit kill does.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            info!(pid = ?pid, "Killing worker process");
            if let Err(e) = child.start_kill() {
                warn!(pid = ?pid, error = %e, "Failed to kill worker");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(pid = ?pid, error = %e, "Error waiting for worker");
            None
        }
    };

    for reader in readers {
        if tokio::time::timeout(drain_timeout, reader).await.is_err() {
            debug!(pid = ?pid, "Worker stream still open after exit");
        }
    }

    debug!(pid = ?pid, ?code, "Worker exited");
    let _ = event_tx.send(WorkerEvent::Exited(code)).await;
}
