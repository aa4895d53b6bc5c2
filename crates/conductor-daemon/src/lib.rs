//! Conductor Daemon Library
//!
//! Core functionality for the Conductor daemon:
//! - Worker process launching and supervision
//! - Priority/dependency scheduling under a concurrency ceiling
//! - Per-process timeouts and periodic cleanup
//! - JSON-RPC control server over stdin/stdout
//! - `SQLite` archive of finished processes

pub mod orchestration;
pub mod server;
pub mod storage;
pub mod subprocess;
