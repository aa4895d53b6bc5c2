//! Worker subprocesses: the launch contract and its implementations.

pub mod launcher;
pub mod manual;

pub use launcher::{
    LaunchError, LaunchSpec, LaunchedWorker, ProcessLauncher, WorkerEvent, WorkerHandle,
    WorkerLauncher,
};
pub use manual::{ManualLauncher, ManualWorker};
