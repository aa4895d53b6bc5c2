//! Process orchestration: queue, supervisor and the monitor around them.
//!
//! - [`TaskQueue`]: pending entries ordered by priority, gated on
//!   dependencies, plus the table of every process record.
//! - [`Supervisor`]: launches workers and drives a record through its
//!   state machine.
//! - [`Orchestrator`]: the scheduler/monitor facade. Enforces the
//!   concurrency ceiling, timeouts and periodic cleanup.
//! - [`workflow`]: expands a workflow template into dependent tasks.

pub mod manager;
pub mod queue;
pub mod record;
pub mod supervisor;
pub mod workflow;

pub use manager::Orchestrator;
pub use queue::TaskQueue;
pub use record::{ProcessRecord, ProcessSnapshot, QueueEntry, TaskRequest, clamp_priority};
pub use supervisor::Supervisor;
pub use workflow::WorkflowOptions;
