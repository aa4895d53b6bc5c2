//! A launcher whose workers are driven by the caller.
//!
//! No OS process is started. Each launch records its [`LaunchSpec`] and
//! hands back a [`ManualWorker`] through which the caller emits stdout,
//! stderr and the exit event, and reads what was written to stdin. Killing
//! the worker emits `Exited(None)`, like a signalled process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};

use super::launcher::{
    LaunchError, LaunchSpec, LaunchedWorker, WorkerEvent, WorkerHandle, WorkerLauncher,
};
use crate::orchestration::supervisor::ENV_PROCESS_ID;

/// Caller-driven [`WorkerLauncher`].
#[derive(Debug, Default)]
pub struct ManualLauncher {
    workers: Mutex<Vec<ManualWorker>>,
    fail_next: Mutex<Option<String>>,
}

impl ManualLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launch fail with the given reason.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    /// All workers launched so far, in launch order.
    pub fn workers(&self) -> Vec<ManualWorker> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn launch_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The worker launched for the given process id.
    pub fn worker_for(&self, process_id: &str) -> Option<ManualWorker> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.spec.env_var(ENV_PROCESS_ID) == Some(process_id))
            .cloned()
    }
}

impl WorkerLauncher for ManualLauncher {
    fn launch(&self, spec: LaunchSpec) -> Result<LaunchedWorker, LaunchError> {
        if let Some(reason) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(LaunchError::SpawnFailed {
                program: spec.program.display().to_string(),
                reason,
            });
        }

        let (event_tx, event_rx) = mpsc::channel(256);
        let (stdin_tx, stdin_rx) = mpsc::channel(32);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let killed = Arc::new(AtomicBool::new(false));

        let kill_events = event_tx.clone();
        let kill_flag = Arc::clone(&killed);
        tokio::spawn(async move {
            if kill_rx.await.is_ok() {
                kill_flag.store(true, Ordering::SeqCst);
                let _ = kill_events.send(WorkerEvent::Exited(None)).await;
            }
        });

        let worker = ManualWorker {
            spec,
            events: event_tx,
            stdin: Arc::new(Mutex::new(stdin_rx)),
            killed,
        };
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);

        Ok(LaunchedWorker {
            handle: WorkerHandle::new(None, stdin_tx, kill_tx),
            events: event_rx,
        })
    }
}

/// Caller side of a manually driven worker.
#[derive(Debug, Clone)]
pub struct ManualWorker {
    spec: LaunchSpec,
    events: mpsc::Sender<WorkerEvent>,
    stdin: Arc<Mutex<mpsc::Receiver<String>>>,
    killed: Arc<AtomicBool>,
}

impl ManualWorker {
    pub const fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn process_id(&self) -> Option<&str> {
        self.spec.env_var(ENV_PROCESS_ID)
    }

    pub async fn stdout(&self, chunk: &str) -> bool {
        self.events
            .send(WorkerEvent::Stdout(chunk.to_string()))
            .await
            .is_ok()
    }

    pub async fn stderr(&self, chunk: &str) -> bool {
        self.events
            .send(WorkerEvent::Stderr(chunk.to_string()))
            .await
            .is_ok()
    }

    pub async fn exit(&self, code: i32) -> bool {
        self.events
            .send(WorkerEvent::Exited(Some(code)))
            .await
            .is_ok()
    }

    /// Lines written to the worker's stdin since the last call.
    pub fn take_input(&self) -> Vec<String> {
        let mut rx = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
