//! Priority/dependency queue and the table of all process records.
//!
//! Pending work is a list of [`QueueEntry`]s; every entry has a matching
//! [`ProcessRecord`] in `Pending` status. Dispatch removes the entry, the
//! record lives on until it is reaped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use conductor_core::status::ProcessStatus;

use super::record::{ProcessRecord, QueueEntry, TaskRequest, clamp_priority};

/// Pending entries plus every known record, keyed by id.
#[derive(Debug, Default)]
pub struct TaskQueue {
    records: HashMap<String, ProcessRecord>,
    pending: Vec<QueueEntry>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` record and queue it. Returns the new id.
    pub fn add_task(&mut self, request: TaskRequest) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let record = ProcessRecord::new(id.clone(), request);
        self.pending.push(record.queue_entry());
        debug!(
            process_id = %id,
            priority = record.priority,
            role = record.role.id,
            dependencies = record.dependencies.len(),
            "Task queued"
        );
        self.records.insert(id.clone(), record);
        id
    }

    /// Pop the highest-priority entry whose dependencies have all completed.
    ///
    /// Entries of equal priority keep submission order. A dependency on an
    /// unknown id is never satisfied.
    pub fn next_eligible_task(&mut self) -> Option<QueueEntry> {
        self.pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        let index = self
            .pending
            .iter()
            .position(|entry| self.dependencies_met(entry))?;
        Some(self.pending.remove(index))
    }

    pub fn dependencies_met(&self, entry: &QueueEntry) -> bool {
        entry.dependencies.iter().all(|dep| {
            self.records
                .get(dep)
                .is_some_and(|r| r.status == ProcessStatus::Completed)
        })
    }

    /// Records holding a live worker.
    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active()).count()
    }

    pub fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.active_count() < max_concurrent
    }

    /// Change the priority of a still-pending entry.
    pub fn update_priority(&mut self, id: &str, priority: i64) -> bool {
        let Some(entry) = self.pending.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        let priority = clamp_priority(priority);
        entry.priority = priority;
        if let Some(record) = self.records.get_mut(id) {
            record.priority = priority;
        }
        true
    }

    /// Drop a still-pending entry together with its record.
    pub fn remove_task(&mut self, id: &str) -> bool {
        let Some(index) = self.pending.iter().position(|e| e.id == id) else {
            return false;
        };
        self.pending.remove(index);
        self.records.remove(id);
        true
    }

    /// Withdraw a still-pending entry and mark its record `Canceled`.
    pub fn cancel_pending(&mut self, id: &str) -> bool {
        let Some(index) = self.pending.iter().position(|e| e.id == id) else {
            return false;
        };
        self.pending.remove(index);
        if let Some(record) = self.records.get_mut(id) {
            record.status = ProcessStatus::Canceled;
            record.last_activity = Instant::now();
            record.annotate("[CANCELED] Removed from the queue before launch");
        }
        true
    }

    /// Delete terminal records idle for longer than `max_age`. Returns the
    /// removed ids.
    pub fn reap_old(&mut self, max_age: Duration) -> Vec<String> {
        self.reap_old_at(Instant::now(), max_age)
    }

    pub fn reap_old_at(&mut self, now: Instant, max_age: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|r| r.is_reapable_at(now, max_age))
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            self.records.remove(id);
        }
        expired
    }

    pub fn by_status(&self, status: ProcessStatus) -> Vec<&ProcessRecord> {
        self.records.values().filter(|r| r.status == status).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ProcessRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ProcessRecord> {
        self.records.get_mut(id)
    }

    pub const fn all(&self) -> &HashMap<String, ProcessRecord> {
        &self.records
    }

    /// Pending entries in their current order.
    pub fn pending(&self) -> &[QueueEntry] {
        &self.pending
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|e| e.id == id)
    }
}
