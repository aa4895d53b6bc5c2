//! Database models for the history archive.

use serde::{Deserialize, Serialize};

/// One archived process, as stored in `process_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: String,
    pub task: String,
    pub role: String,
    pub priority: i64,
    pub status: String,
    pub exit_code: Option<i64>,
    pub runtime_secs: i64,
    pub working_directory: Option<String>,
    /// JSON array of dependency ids.
    pub dependencies: String,
    pub output: String,
    pub created_at: i64,
    pub finished_at: i64,
}

impl HistoryRow {
    pub fn dependency_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.dependencies).unwrap_or_default()
    }
}
