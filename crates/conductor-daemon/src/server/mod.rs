//! Control surface of the daemon.
//!
//! The daemon speaks newline-delimited JSON-RPC 2.0 on stdin/stdout; see
//! [`ControlServer`].

pub mod control;

pub use control::ControlServer;
