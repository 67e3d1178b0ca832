// Scheduled Task Domain Model

use crate::domain::{DomainError, Schedule};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping for one registered task
///
/// The scheduler owns one record per task name; every transition goes through
/// the methods below so the status machine stays in one place:
///
/// ```text
/// Pending/Completed/Failed --begin--> Running --finish--> Completed | Failed
/// any --cancel--> Cancelled (terminal)
/// ```
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: String,
    pub schedule_spec: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    /// Register a task and compute its first fire time
    pub fn new(name: impl Into<String>, schedule_spec: impl Into<String>, now: NaiveDateTime) -> Self {
        let schedule_spec = schedule_spec.into();
        let schedule = Schedule::parse_lenient(&schedule_spec);
        Self {
            name: name.into(),
            next_run: Some(schedule.next_after(now)),
            schedule_spec,
            schedule,
            enabled: true,
            last_run: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Enabled, not already running, and the fire time has been reached
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.enabled
            && !matches!(self.status, TaskStatus::Running | TaskStatus::Cancelled)
            && self.next_run.is_some_and(|next| now >= next)
    }

    /// Mark the task as running
    pub fn begin(&mut self, now: NaiveDateTime) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Running | TaskStatus::Cancelled => Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: TaskStatus::Running.to_string(),
            }),
            _ => {
                self.status = TaskStatus::Running;
                self.last_run = Some(now);
                Ok(())
            }
        }
    }

    /// Record the outcome of a run and compute the next fire time from `finished_at`
    ///
    /// Re-arming from the completion time (not the previous fire time) means
    /// long-running tasks drift forward rather than piling up catch-up runs.
    pub fn finish(&mut self, outcome: Result<String, String>, finished_at: NaiveDateTime) {
        if self.status == TaskStatus::Cancelled {
            return;
        }
        match outcome {
            Ok(result) => {
                self.status = TaskStatus::Completed;
                self.result = Some(result);
                self.error = None;
            }
            Err(error) => {
                self.status = TaskStatus::Failed;
                self.error = Some(error);
            }
        }
        self.next_run = Some(self.schedule.next_after(finished_at));
    }

    pub fn enable(&mut self, now: NaiveDateTime) {
        self.enabled = true;
        self.next_run = Some(self.schedule.next_after(now));
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn cancel(&mut self) {
        self.enabled = false;
        self.status = TaskStatus::Cancelled;
        self.next_run = None;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            name: self.name.clone(),
            schedule: self.schedule_spec.clone(),
            enabled: self.enabled,
            last_run: self.last_run,
            next_run: self.next_run,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a task, safe to hand out across threads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Aggregate scheduler view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub tasks: Vec<TaskSnapshot>,
    pub timestamp: NaiveDateTime,
}
