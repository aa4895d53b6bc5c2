//! `Conductor` Core Library
//!
//! Shared functionality for `Conductor` components:
//! - Agent role catalog and workflow templates
//! - Configuration resolution and hierarchy
//! - JSON-RPC envelope for the control protocol
//! - Common error types and `SQLite` helpers

pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod roles;
pub mod status;
pub mod tracing_init;
pub mod workflow;

pub use config::{Config, ConfigUpdate, OrchestratorConfig};
pub use error::{Error, Result};
pub use roles::Role;
pub use status::ProcessStatus;
pub use workflow::{WorkflowStep, WorkflowTemplate};
