//! Process records and the lightweight descriptors around them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use conductor_core::db::unix_timestamp;
use conductor_core::roles::{self, GENERALIST, Role};
use conductor_core::status::ProcessStatus;

use crate::subprocess::WorkerHandle;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Clamp a priority into `MIN_PRIORITY..=MAX_PRIORITY`.
pub fn clamp_priority(priority: i64) -> u8 {
    let clamped = priority.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY));
    u8::try_from(clamped).unwrap_or(DEFAULT_PRIORITY)
}

/// A task submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Ids of records that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

const fn default_priority() -> i64 {
    DEFAULT_PRIORITY as i64
}

fn default_role() -> String {
    GENERALIST.to_string()
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            priority: default_priority(),
            role: default_role(),
            working_directory: None,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A pending task descriptor. Exists only until the task is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub task: String,
    pub priority: u8,
    pub role: String,
    pub working_directory: Option<PathBuf>,
    pub dependencies: Vec<String>,
}

/// The mutable unit of work: one task, one worker process.
#[derive(Debug)]
pub struct ProcessRecord {
    pub id: String,
    pub task: String,
    pub role: &'static Role,
    pub priority: u8,
    pub status: ProcessStatus,
    /// Creation time, reset at launch.
    pub start_time: Instant,
    pub last_activity: Instant,
    /// Set exactly while `status == WaitingForInput`.
    pub waiting_since: Option<Instant>,
    /// Combined stdout/stderr plus orchestrator annotations. Append-only.
    pub output: String,
    pub exit_code: Option<i32>,
    pub working_directory: Option<PathBuf>,
    pub dependencies: Vec<String>,
    /// Unix seconds, for reporting.
    pub created_at: i64,
    pub(crate) handle: Option<WorkerHandle>,
}

impl ProcessRecord {
    /// A new `Pending` record.
    pub fn new(id: String, request: TaskRequest) -> Self {
        let now = Instant::now();
        Self {
            id,
            task: request.task,
            role: roles::get_role(&request.role),
            priority: clamp_priority(request.priority),
            status: ProcessStatus::Pending,
            start_time: now,
            last_activity: now,
            waiting_since: None,
            output: String::new(),
            exit_code: None,
            working_directory: request.working_directory,
            dependencies: request.dependencies,
            created_at: unix_timestamp(),
            handle: None,
        }
    }

    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub const fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(WorkerHandle::pid)
    }

    /// Append an annotation on a line of its own.
    pub fn annotate(&mut self, line: &str) {
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            id: self.id.clone(),
            task: self.task.clone(),
            priority: self.priority,
            role: self.role.id.to_string(),
            working_directory: self.working_directory.clone(),
            dependencies: self.dependencies.clone(),
        }
    }

    /// Whole seconds since launch; frozen at the last activity once the
    /// worker is no longer active.
    pub fn runtime_seconds(&self) -> u64 {
        self.runtime_seconds_at(Instant::now())
    }

    pub fn runtime_seconds_at(&self, now: Instant) -> u64 {
        let end = if self.is_active() {
            now
        } else {
            self.last_activity
        };
        end.saturating_duration_since(self.start_time).as_secs()
    }

    /// Whether the record exceeded its running or waiting ceiling.
    ///
    /// The running ceiling counts from launch, not from the last output,
    /// so a chatty worker is still cut off.
    pub fn has_timed_out(&self, running_timeout: Duration, waiting_timeout: Duration) -> bool {
        self.timed_out_at(Instant::now(), running_timeout, waiting_timeout)
    }

    pub fn timed_out_at(
        &self,
        now: Instant,
        running_timeout: Duration,
        waiting_timeout: Duration,
    ) -> bool {
        match self.status {
            ProcessStatus::WaitingForInput => self
                .waiting_since
                .is_some_and(|since| now.saturating_duration_since(since) > waiting_timeout),
            ProcessStatus::Running => {
                now.saturating_duration_since(self.start_time) > running_timeout
            }
            _ => false,
        }
    }

    /// Terminal and idle for longer than `max_age`.
    pub fn is_reapable_at(&self, now: Instant, max_age: Duration) -> bool {
        self.is_terminal() && now.saturating_duration_since(self.last_activity) > max_age
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let now = Instant::now();
        ProcessSnapshot {
            id: self.id.clone(),
            task: self.task.clone(),
            role: self.role.id.to_string(),
            priority: self.priority,
            status: self.status,
            runtime_secs: self.runtime_seconds_at(now),
            waiting_secs: self
                .waiting_since
                .map(|since| now.saturating_duration_since(since).as_secs()),
            exit_code: self.exit_code,
            pid: self.pid(),
            working_directory: self.working_directory.clone(),
            dependencies: self.dependencies.clone(),
            created_at: self.created_at,
            output: self.output.clone(),
        }
    }
}

/// Read-only view of a record, safe to hand out and serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: String,
    pub task: String,
    pub role: String,
    pub priority: u8,
    pub status: ProcessStatus,
    pub runtime_secs: u64,
    pub waiting_secs: Option<u64>,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub working_directory: Option<PathBuf>,
    pub dependencies: Vec<String>,
    pub created_at: i64,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: ProcessStatus) -> ProcessRecord {
        let mut r = ProcessRecord::new("p".into(), TaskRequest::new("do it"));
        r.status = status;
        r
    }

    #[test]
    fn priority_is_clamped() {
        assert_eq!(clamp_priority(0), 1);
        assert_eq!(clamp_priority(-4), 1);
        assert_eq!(clamp_priority(7), 7);
        assert_eq!(clamp_priority(99), 10);
        let r = ProcessRecord::new("p".into(), TaskRequest::new("t").with_priority(42));
        assert_eq!(r.priority, MAX_PRIORITY);
    }

    #[test]
    fn unknown_role_resolves_to_generalist() {
        let r = ProcessRecord::new("p".into(), TaskRequest::new("t").with_role("Wizard"));
        assert_eq!(r.role.id, GENERALIST);
        let r = ProcessRecord::new("p".into(), TaskRequest::new("t").with_role("TESTER"));
        assert_eq!(r.role.id, "tester");
    }

    #[test]
    fn running_timeout_counts_from_start() {
        let mut r = record(ProcessStatus::Running);
        let start = r.start_time;
        // Recent activity does not extend the ceiling.
        r.last_activity = start + Duration::from_secs(95);
        let limit = Duration::from_secs(60);
        let long = Duration::from_secs(3600);
        assert!(!r.timed_out_at(start + Duration::from_secs(60), limit, long));
        assert!(r.timed_out_at(start + Duration::from_secs(100), limit, long));
    }

    #[test]
    fn waiting_timeout_counts_from_waiting_since() {
        let mut r = record(ProcessStatus::WaitingForInput);
        let since = r.start_time + Duration::from_secs(500);
        r.waiting_since = Some(since);
        let limit = Duration::from_secs(30);
        let long = Duration::from_secs(3600);
        assert!(!r.timed_out_at(since + Duration::from_secs(10), long, limit));
        assert!(r.timed_out_at(since + Duration::from_secs(31), long, limit));
    }

    #[test]
    fn other_statuses_never_time_out() {
        let zero = Duration::ZERO;
        for status in [
            ProcessStatus::Pending,
            ProcessStatus::Completed,
            ProcessStatus::Failed,
            ProcessStatus::Canceled,
        ] {
            let r = record(status);
            let later = r.start_time + Duration::from_secs(10_000);
            assert!(!r.timed_out_at(later, zero, zero), "{status}");
        }
    }

    #[test]
    fn runtime_freezes_after_exit() {
        let mut r = record(ProcessStatus::Running);
        let start = r.start_time;
        assert_eq!(r.runtime_seconds_at(start + Duration::from_millis(2_900)), 2);

        r.status = ProcessStatus::Completed;
        r.last_activity = start + Duration::from_secs(5);
        assert_eq!(r.runtime_seconds_at(start + Duration::from_secs(500)), 5);
    }

    #[test]
    fn annotations_start_on_a_new_line() {
        let mut r = record(ProcessStatus::Running);
        r.output.push_str("partial");
        r.annotate("[EXIT] done");
        assert_eq!(r.output, "partial\n[EXIT] done\n");
        r.annotate("[NOTE] again");
        assert_eq!(r.output, "partial\n[EXIT] done\n[NOTE] again\n");
    }

    #[test]
    fn reapable_only_when_terminal_and_old() {
        let max_age = Duration::from_secs(60);
        let active = record(ProcessStatus::Running);
        let later = active.last_activity + Duration::from_secs(120);
        assert!(!active.is_reapable_at(later, max_age));

        let done = record(ProcessStatus::Failed);
        assert!(!done.is_reapable_at(done.last_activity + Duration::from_secs(30), max_age));
        assert!(done.is_reapable_at(later, max_age));
    }
}
