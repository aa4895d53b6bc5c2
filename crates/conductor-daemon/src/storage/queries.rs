//! History archive queries.

use conductor_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::HistoryRow;
use crate::orchestration::ProcessSnapshot;

impl Database {
    /// Store (or overwrite) the final snapshot of a process.
    pub async fn archive_process(&self, snapshot: &ProcessSnapshot) -> Result<(), DatabaseError> {
        let dependencies = serde_json::to_string(&snapshot.dependencies)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        let working_directory = snapshot
            .working_directory
            .as_ref()
            .map(|p| p.display().to_string());

        sqlx::query(
            r"
            INSERT OR REPLACE INTO process_history
                (id, task, role, priority, status, exit_code, runtime_secs,
                 working_directory, dependencies, output, created_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.task)
        .bind(&snapshot.role)
        .bind(i64::from(snapshot.priority))
        .bind(snapshot.status.as_str())
        .bind(snapshot.exit_code.map(i64::from))
        .bind(i64::try_from(snapshot.runtime_secs).unwrap_or(i64::MAX))
        .bind(working_directory)
        .bind(dependencies)
        .bind(&snapshot.output)
        .bind(snapshot.created_at)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Get one archived process by id.
    pub async fn get_history(&self, id: &str) -> Result<HistoryRow, DatabaseError> {
        sqlx::query_as::<_, HistoryRow>("SELECT * FROM process_history WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Process {id}")))
    }

    /// Most recently finished processes first.
    pub async fn list_history(&self, limit: u32) -> Result<Vec<HistoryRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM process_history ORDER BY finished_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
