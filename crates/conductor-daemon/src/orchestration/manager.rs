//! Scheduler and monitor.
//!
//! [`Orchestrator`] is the high-level coordinator that:
//! - keeps the number of live workers under `max_concurrent_processes`
//! - dispatches pending tasks by priority once their dependencies complete
//! - pumps each worker's events into its record
//! - arms a per-process watchdog that enforces the running and waiting
//!   ceilings
//! - runs a periodic sweep that reaps old records and refills free slots
//! - archives finished processes when a history database is attached
//!
//! Lock order is queue, then watchdogs. The config lock is never held
//! while another lock is taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use conductor_core::config::{ConfigUpdate, OrchestratorConfig};
use conductor_core::status::ProcessStatus;

use super::queue::TaskQueue;
use super::record::{ProcessRecord, ProcessSnapshot, QueueEntry, TaskRequest};
use super::supervisor::Supervisor;
use crate::storage::{Database, DatabaseError, HistoryRow};
use crate::subprocess::{WorkerEvent, WorkerLauncher};

/// Lower bound on the sweep period so a zero setting cannot spin.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Lower bound on the watchdog poll period; a zero period is rejected by
/// `interval_at`.
const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

struct Shared {
    queue: RwLock<TaskQueue>,
    config: RwLock<OrchestratorConfig>,
    supervisor: Supervisor,
    /// Per-process watchdog tasks keyed by process id.
    watchdogs: Mutex<HashMap<String, JoinHandle<()>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    history: Option<Database>,
}

/// Public facade over the queue, the supervisor and the monitor tasks.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.is_running())
            .field("history", &self.inner.history.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchVerdict {
    Healthy,
    Finished,
    TimedOut,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::build(config, launcher, None)
    }

    /// Like [`Orchestrator::new`], archiving finished processes into `db`.
    pub fn with_history(
        config: OrchestratorConfig,
        launcher: Arc<dyn WorkerLauncher>,
        db: Database,
    ) -> Self {
        Self::build(config, launcher, Some(db))
    }

    fn build(
        config: OrchestratorConfig,
        launcher: Arc<dyn WorkerLauncher>,
        history: Option<Database>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                queue: RwLock::new(TaskQueue::new()),
                config: RwLock::new(config),
                supervisor: Supervisor::new(launcher),
                watchdogs: Mutex::new(HashMap::new()),
                sweep: Mutex::new(None),
                running: AtomicBool::new(false),
                history,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Arm the periodic sweep, re-arm watchdogs for workers that outlived a
    /// previous `stop_monitor`, and dispatch whatever is already queued.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.sweep_loop().await });
        *self.inner.sweep.lock().await = Some(handle);

        let rearmed = {
            let queue = self.inner.queue.read().await;
            let mut watchdogs = self.inner.watchdogs.lock().await;
            let mut rearmed = 0;
            for record in queue.all().values().filter(|r| r.is_active()) {
                if !watchdogs.contains_key(&record.id) {
                    let handle = self.spawn_watchdog(record.id.clone());
                    watchdogs.insert(record.id.clone(), handle);
                    rearmed += 1;
                }
            }
            rearmed
        };
        info!(rearmed, "Orchestrator monitor started");
        self.schedule_next().await;
    }

    /// Disarm the sweep and every watchdog.
    ///
    /// Live workers are left running and their events are still recorded,
    /// but nothing new is dispatched and no timeout is enforced.
    pub async fn stop_monitor(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.sweep.lock().await.take() {
            handle.abort();
        }
        // Holding the queue lock waits out any drain that saw the monitor
        // running and is still inserting watchdogs.
        let _queue = self.inner.queue.write().await;
        let mut watchdogs = self.inner.watchdogs.lock().await;
        let disarmed = watchdogs.len();
        for (_, handle) in watchdogs.drain() {
            handle.abort();
        }
        info!(watchdogs = disarmed, "Orchestrator monitor stopped");
    }

    /// Queue a task and try to dispatch. Returns the new process id.
    pub async fn submit(&self, request: TaskRequest) -> String {
        let id = self.inner.queue.write().await.add_task(request);
        info!(process_id = %id, "Task submitted");
        self.schedule_next().await;
        id
    }

    /// Launch eligible tasks while there is capacity. Returns how many
    /// workers were started.
    pub async fn schedule_next(&self) -> usize {
        if !self.is_running() {
            return 0;
        }
        let config = self.inner.config.read().await.clone();

        let mut launched = 0;
        let mut failed = Vec::new();
        {
            let mut queue = self.inner.queue.write().await;
            // `stop_monitor` may have run while we waited for the lock.
            if !self.is_running() {
                return 0;
            }
            while queue.has_capacity(config.max_concurrent_processes) {
                let Some(entry) = queue.next_eligible_task() else {
                    break;
                };
                let Some(record) = queue.get_mut(&entry.id) else {
                    continue;
                };
                match self.inner.supervisor.launch(record, &config) {
                    Some(events) => {
                        self.spawn_event_pump(entry.id.clone(), events);
                        let watchdog = self.spawn_watchdog(entry.id.clone());
                        self.inner.watchdogs.lock().await.insert(entry.id, watchdog);
                        launched += 1;
                    }
                    None => failed.push(record.snapshot()),
                }
            }
        }

        for snapshot in failed {
            self.archive(&snapshot).await;
        }
        if launched > 0 {
            debug!(launched, "Dispatched pending tasks");
        }
        launched
    }

    fn spawn_event_pump(&self, id: String, mut events: mpsc::Receiver<WorkerEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let finished = {
                    let mut queue = this.inner.queue.write().await;
                    let Some(record) = queue.get_mut(&id) else {
                        return;
                    };
                    Supervisor::apply_event(record, event).then(|| record.snapshot())
                };
                if let Some(snapshot) = finished {
                    this.finish(&id, &snapshot).await;
                    return;
                }
            }
            debug!(process_id = %id, "Worker event stream closed");
        });
    }

    async fn finish(&self, id: &str, snapshot: &ProcessSnapshot) {
        if let Some(handle) = self.inner.watchdogs.lock().await.remove(id) {
            handle.abort();
        }
        self.archive(snapshot).await;
        self.schedule_next().await;
    }

    fn spawn_watchdog(&self, id: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.watch(id).await })
    }

    async fn watch(&self, id: String) {
        let period = self
            .inner
            .config
            .read()
            .await
            .watchdog_interval()
            .max(MIN_WATCHDOG_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let (running_limit, waiting_limit) = {
                let config = self.inner.config.read().await;
                (config.process_timeout(), config.interaction_timeout())
            };

            let verdict = {
                let mut queue = self.inner.queue.write().await;
                match queue.get_mut(&id) {
                    None => WatchVerdict::Finished,
                    Some(record) if record.is_terminal() => WatchVerdict::Finished,
                    Some(record) if record.has_timed_out(running_limit, waiting_limit) => {
                        time_out(record, running_limit, waiting_limit);
                        WatchVerdict::TimedOut
                    }
                    Some(_) => WatchVerdict::Healthy,
                }
            };

            if verdict == WatchVerdict::Healthy {
                continue;
            }
            // Finishing on our own: drop the handle without aborting.
            self.inner.watchdogs.lock().await.remove(&id);
            self.schedule_next().await;
            return;
        }
    }

    async fn sweep_loop(&self) {
        loop {
            let period = self
                .inner
                .config
                .read()
                .await
                .cleanup_interval()
                .max(MIN_SWEEP_INTERVAL);
            tokio::time::sleep(period).await;
            self.sweep().await;
        }
    }

    /// Reap old terminal records, then refill free slots. Returns the
    /// reaped ids.
    pub async fn sweep(&self) -> Vec<String> {
        let max_age = self.inner.config.read().await.old_process_max_age();
        let reaped = self.inner.queue.write().await.reap_old(max_age);
        if !reaped.is_empty() {
            info!(count = reaped.len(), "Reaped finished processes");
        }
        self.schedule_next().await;
        reaped
    }

    /// Cancel a task.
    ///
    /// A pending task is withdrawn from the queue; a live worker is killed.
    /// Returns `false` for unknown ids and for records that already
    /// finished.
    pub async fn stop(&self, id: &str) -> bool {
        let (stopped, withdrawn) = {
            let mut queue = self.inner.queue.write().await;
            if queue.cancel_pending(id) {
                (true, queue.get(id).map(ProcessRecord::snapshot))
            } else if let Some(record) = queue.get_mut(id) {
                (Supervisor::stop(record), None)
            } else {
                debug!(process_id = %id, "Stop requested for unknown process");
                return false;
            }
        };
        if !stopped {
            return false;
        }

        if let Some(handle) = self.inner.watchdogs.lock().await.remove(id) {
            handle.abort();
        }
        // Live workers are archived by their event pump once they exit.
        if let Some(snapshot) = withdrawn {
            info!(process_id = %id, "Pending task canceled");
            self.archive(&snapshot).await;
        }
        self.schedule_next().await;
        true
    }

    pub async fn send_input(&self, id: &str, text: &str) -> bool {
        let mut queue = self.inner.queue.write().await;
        queue
            .get_mut(id)
            .is_some_and(|record| Supervisor::send_input(record, text))
    }

    pub async fn update_priority(&self, id: &str, priority: i64) -> bool {
        self.inner.queue.write().await.update_priority(id, priority)
    }

    pub async fn remove_task(&self, id: &str) -> bool {
        let removed = self.inner.queue.write().await.remove_task(id);
        if removed {
            info!(process_id = %id, "Pending task removed");
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<ProcessSnapshot> {
        self.inner.queue.read().await.get(id).map(ProcessRecord::snapshot)
    }

    /// Every known record, oldest first.
    pub async fn list_all(&self) -> Vec<ProcessSnapshot> {
        let queue = self.inner.queue.read().await;
        sorted(queue.all().values().map(ProcessRecord::snapshot).collect())
    }

    pub async fn list_by_status(&self, status: ProcessStatus) -> Vec<ProcessSnapshot> {
        let queue = self.inner.queue.read().await;
        sorted(
            queue
                .by_status(status)
                .into_iter()
                .map(ProcessRecord::snapshot)
                .collect(),
        )
    }

    /// Pending entries in dispatch order (dependencies aside).
    pub async fn list_pending(&self) -> Vec<QueueEntry> {
        let mut pending = self.inner.queue.read().await.pending().to_vec();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        pending
    }

    pub async fn runtime_seconds(&self, id: &str) -> Option<u64> {
        self.inner
            .queue
            .read()
            .await
            .get(id)
            .map(ProcessRecord::runtime_seconds)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.queue.read().await.active_count()
    }

    /// Merge a partial config. Dispatches immediately when the concurrency
    /// ceiling was raised. Returns the resulting config.
    pub async fn update_config(&self, update: ConfigUpdate) -> OrchestratorConfig {
        let (raised, config) = {
            let mut config = self.inner.config.write().await;
            let raised = config.apply(update);
            (raised, config.clone())
        };
        info!(
            max_concurrent_processes = config.max_concurrent_processes,
            worker = ?config.worker_executable_path,
            "Orchestrator config updated"
        );
        if raised {
            self.schedule_next().await;
        }
        config
    }

    pub async fn config(&self) -> OrchestratorConfig {
        self.inner.config.read().await.clone()
    }

    /// Archived processes, newest first. Empty when no archive is attached.
    pub async fn history(&self, limit: u32) -> Result<Vec<HistoryRow>, DatabaseError> {
        match &self.inner.history {
            Some(db) => db.list_history(limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn has_history(&self) -> bool {
        self.inner.history.is_some()
    }

    async fn archive(&self, snapshot: &ProcessSnapshot) {
        let Some(db) = &self.inner.history else {
            return;
        };
        if let Err(e) = db.archive_process(snapshot).await {
            warn!(process_id = %snapshot.id, error = %e, "Failed to archive process");
        }
    }
}

fn time_out(record: &mut ProcessRecord, running_limit: Duration, waiting_limit: Duration) {
    let (state, limit) = if record.status == ProcessStatus::WaitingForInput {
        ("waiting for input", waiting_limit)
    } else {
        ("running", running_limit)
    };
    warn!(
        process_id = %record.id,
        state,
        limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        "Process timed out"
    );
    record.annotate(&format!(
        "[TIMEOUT] Exceeded {}s while {state}",
        limit.as_secs()
    ));
    Supervisor::stop(record);
}

fn sorted(mut snapshots: Vec<ProcessSnapshot>) -> Vec<ProcessSnapshot> {
    snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    snapshots
}
