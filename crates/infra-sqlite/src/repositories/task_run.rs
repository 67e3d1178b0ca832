// Task Run Recorder - scheduler bookkeeping in iptv_tasks

use crate::error::StorageError;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use iptv_core::domain::{TaskRun, TaskSnapshot};
use iptv_core::port::TaskRunRecorder;
use tracing::debug;

#[derive(sqlx::FromRow)]
struct TaskRunRow {
    name: String,
    last_run: Option<NaiveDateTime>,
    next_run: Option<NaiveDateTime>,
    status: Option<String>,
    result: Option<String>,
}

impl From<TaskRunRow> for TaskRun {
    fn from(row: TaskRunRow) -> Self {
        TaskRun {
            name: row.name,
            last_run: row.last_run,
            next_run: row.next_run,
            status: row.status.unwrap_or_else(|| "pending".to_string()),
            result: row.result,
        }
    }
}

/// One row per task name, overwritten on every state change
#[derive(Clone)]
pub struct SqliteTaskRunRecorder {
    storage: Storage,
}

impl SqliteTaskRunRecorder {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn upsert(&self, task: &TaskSnapshot) -> Result<(), StorageError> {
        // A failed run stores its error text in the result column
        let result = task.error.clone().or_else(|| task.result.clone());
        self.storage
            .execute(
                "INSERT INTO iptv_tasks (name, last_run, next_run, status, result) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(name) DO UPDATE SET last_run = excluded.last_run, \
                 next_run = excluded.next_run, status = excluded.status, \
                 result = excluded.result, updated_at = CURRENT_TIMESTAMP",
                &[
                    task.name.as_str().into(),
                    task.last_run.into(),
                    task.next_run.into(),
                    task.status.as_str().into(),
                    result.into(),
                ],
                false,
            )
            .await?;
        debug!(task = %task.name, status = %task.status, "Task state recorded");
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<Option<TaskRun>, StorageError> {
        let rows: Vec<TaskRunRow> = self
            .storage
            .fetch_as(
                "SELECT name, last_run, next_run, status, result FROM iptv_tasks WHERE name = ?",
                &[name.into()],
            )
            .await?;
        Ok(rows.into_iter().next().map(TaskRun::from))
    }

    pub async fn list(&self) -> Result<Vec<TaskRun>, StorageError> {
        let rows: Vec<TaskRunRow> = self
            .storage
            .fetch_as(
                "SELECT name, last_run, next_run, status, result FROM iptv_tasks ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows.into_iter().map(TaskRun::from).collect())
    }
}

#[async_trait]
impl TaskRunRecorder for SqliteTaskRunRecorder {
    async fn record(&self, task: &TaskSnapshot) -> iptv_core::Result<()> {
        Ok(self.upsert(task).await?)
    }
}
