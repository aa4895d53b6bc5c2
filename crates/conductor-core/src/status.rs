//! Lifecycle status of a supervised worker process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Status of a process record.
///
/// ```text
/// Pending -> Running <-> WaitingForInput
/// Running | WaitingForInput -> Completed | Failed | Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Queued, not yet launched.
    Pending,
    /// Worker process is alive.
    Running,
    /// Worker printed an interactive prompt and is waiting on stdin.
    WaitingForInput,
    /// Worker exited with code 0.
    Completed,
    /// Worker exited non-zero, or could not be launched.
    Failed,
    /// Stopped explicitly or by a timeout.
    Canceled,
}

impl ProcessStatus {
    /// Statuses that hold a live OS process.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::WaitingForInput)
    }

    /// Statuses that never change again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingForInput => "waiting_for_input",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting_for_input" | "waiting" => Ok(Self::WaitingForInput),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}
