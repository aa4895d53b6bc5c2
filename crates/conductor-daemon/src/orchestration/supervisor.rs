//! Process supervisor: drives one [`ProcessRecord`] through its state
//! machine.
//!
//! ```text
//! Pending --launch--> Running <--input-- WaitingForInput
//!                        |  --prompt marker-->  |
//!                        +----------+-----------+
//!                                   | exit 0 / exit != 0 / stop
//!                                   v
//!                      Completed / Failed / Canceled
//! ```
//!
//! Nothing here returns an error: launch failures end in `Failed` with an
//! `[ERROR]` annotation, and invalid commands are rejected with `false`.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use conductor_core::config::OrchestratorConfig;
use conductor_core::status::ProcessStatus;

use super::record::ProcessRecord;
use crate::subprocess::{LaunchSpec, WorkerEvent, WorkerLauncher};

pub const ENV_PROCESS_ID: &str = "CONDUCTOR_PROCESS_ID";
pub const ENV_ROLE: &str = "CONDUCTOR_ROLE";
pub const ENV_TASK: &str = "CONDUCTOR_TASK";
pub const ENV_ROLE_PROMPT: &str = "CONDUCTOR_ROLE_PROMPT";
pub const ENV_WORKING_DIR: &str = "CONDUCTOR_WORKING_DIR";

/// Substrings in worker stdout that mean it is blocked on a question.
pub const PROMPT_MARKERS: &[&str] = &[
    "(Y/n)",
    "Do you want to proceed?",
    "Enter your choice:",
    "[y/N]",
];

pub fn contains_prompt_marker(chunk: &str) -> bool {
    PROMPT_MARKERS.iter().any(|marker| chunk.contains(marker))
}

/// Starts workers for records and applies their events.
#[derive(Clone)]
pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { launcher }
    }

    /// Launch a worker for `record`.
    ///
    /// On success the record is `Running`, holds the worker handle, and the
    /// worker's event stream is returned for the caller to pump. On failure
    /// the record is `Failed` and `None` is returned.
    pub fn launch(
        &self,
        record: &mut ProcessRecord,
        config: &OrchestratorConfig,
    ) -> Option<mpsc::Receiver<WorkerEvent>> {
        let now = Instant::now();
        record.start_time = now;
        record.last_activity = now;

        let Some(program) = config.worker_executable_path.as_deref() else {
            error!(process_id = %record.id, "Worker executable path is not configured");
            fail_launch(record, "Worker executable path is not configured");
            return None;
        };

        let spec = build_launch_spec(record, program, &config.worker_args);
        match self.launcher.launch(spec) {
            Ok(launched) => {
                record.annotate(&format!(
                    "[LAUNCH] {} ({}) as {}",
                    record.task,
                    record.role.id,
                    program.display()
                ));
                record.status = ProcessStatus::Running;
                record.handle = Some(launched.handle);
                info!(
                    process_id = %record.id,
                    role = record.role.id,
                    pid = ?record.pid(),
                    "Worker launched"
                );
                Some(launched.events)
            }
            Err(e) => {
                error!(process_id = %record.id, error = %e, "Failed to launch worker");
                fail_launch(record, &e.to_string());
                None
            }
        }
    }

    /// Fold one worker event into the record. Returns `true` once the record
    /// is terminal.
    pub fn apply_event(record: &mut ProcessRecord, event: WorkerEvent) -> bool {
        match event {
            WorkerEvent::Stdout(chunk) => {
                record.output.push_str(&chunk);
                record.last_activity = Instant::now();
                if record.status == ProcessStatus::Running && contains_prompt_marker(&chunk) {
                    record.status = ProcessStatus::WaitingForInput;
                    record.waiting_since = Some(record.last_activity);
                    info!(process_id = %record.id, "Worker is waiting for input");
                }
                false
            }
            WorkerEvent::Stderr(chunk) => {
                debug!(process_id = %record.id, stderr = %chunk.trim_end(), "Worker stderr");
                for line in chunk.lines() {
                    record.annotate(&format!("[ERROR] {line}"));
                }
                record.last_activity = Instant::now();
                false
            }
            WorkerEvent::Exited(code) => {
                record.exit_code = code;
                record.last_activity = Instant::now();
                record.waiting_since = None;
                record.handle = None;
                if record.status != ProcessStatus::Canceled {
                    record.status = if code == Some(0) {
                        ProcessStatus::Completed
                    } else {
                        ProcessStatus::Failed
                    };
                }
                let code_text = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                record.annotate(&format!("[EXIT] Process exited with code {code_text}"));
                info!(
                    process_id = %record.id,
                    exit_code = ?code,
                    status = %record.status,
                    "Worker exited"
                );
                true
            }
        }
    }

    /// Answer a pending prompt.
    pub fn send_input(record: &mut ProcessRecord, text: &str) -> bool {
        if record.status != ProcessStatus::WaitingForInput {
            debug!(process_id = %record.id, status = %record.status, "Input rejected: not waiting");
            return false;
        }
        let Some(handle) = record.handle.as_ref() else {
            warn!(process_id = %record.id, "Input rejected: no live worker");
            return false;
        };
        if !handle.write_line(text) {
            return false;
        }
        record.annotate(&format!("[USER INPUT] {text}"));
        record.waiting_since = None;
        record.status = ProcessStatus::Running;
        record.last_activity = Instant::now();
        info!(process_id = %record.id, "Input delivered to worker");
        true
    }

    /// Forcefully terminate a live worker and mark the record `Canceled`.
    pub fn stop(record: &mut ProcessRecord) -> bool {
        if !record.is_active() {
            warn!(
                process_id = %record.id,
                status = %record.status,
                "Cannot stop a process that is not running"
            );
            return false;
        }
        if let Some(handle) = record.handle.as_mut() {
            handle.kill();
        }
        record.status = ProcessStatus::Canceled;
        record.waiting_since = None;
        record.last_activity = Instant::now();
        record.annotate("[CANCELED] Process stopped");
        info!(process_id = %record.id, "Worker stopped");
        true
    }
}

fn fail_launch(record: &mut ProcessRecord, reason: &str) {
    record.status = ProcessStatus::Failed;
    record.last_activity = Instant::now();
    record.annotate(&format!("[ERROR] Failed to launch worker: {reason}"));
}

/// The full prompt a worker receives: role framing, then the task.
pub fn worker_prompt(record: &ProcessRecord) -> String {
    format!("{}\n\n{}", record.role.prompt_prefix, record.task)
}

/// Resolve argument placeholders and the role-derived environment.
pub fn build_launch_spec(record: &ProcessRecord, program: &Path, args: &[String]) -> LaunchSpec {
    let prompt = worker_prompt(record);
    let args = args
        .iter()
        .map(|arg| {
            arg.replace("{prompt}", &prompt)
                .replace("{task}", &record.task)
                .replace("{role}", record.role.id)
        })
        .collect();

    let mut env = vec![
        (ENV_PROCESS_ID.to_string(), record.id.clone()),
        (ENV_ROLE.to_string(), record.role.id.to_string()),
        (ENV_TASK.to_string(), record.task.clone()),
        (
            ENV_ROLE_PROMPT.to_string(),
            record.role.prompt_prefix.to_string(),
        ),
    ];
    if let Some(dir) = &record.working_directory {
        env.push((ENV_WORKING_DIR.to_string(), dir.display().to_string()));
    }

    LaunchSpec {
        program: program.to_path_buf(),
        args,
        env,
        working_directory: record.working_directory.clone(),
    }
}
