use chrono::{DateTime, Utc};
use thiserror::Error;

pub type TimerResult<T> = Result<T, TimerError>;

/// Errors raised by the timer core. None of them are resolved silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("invalid interval: {reason}")]
    InvalidInterval { reason: String },

    #[error("data integrity violation: {0}")]
    DataIntegrity(IntegrityIssue),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("timer state lock poisoned")]
    LockPoisoned,
}

impl TimerError {
    pub fn invalid_interval(reason: impl Into<String>) -> Self {
        Self::InvalidInterval {
            reason: reason.into(),
        }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.into(),
        }
    }

    pub fn interval_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "interval",
            id: id.into(),
        }
    }

    pub fn project_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "project",
            id: id.into(),
        }
    }

    pub fn client_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "client",
            id: id.into(),
        }
    }

    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "checklist item",
            id: id.into(),
        }
    }

    pub(crate) fn end_before_start(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::invalid_interval(format!(
            "end {} is earlier than start {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        ))
    }
}

/// Broken invariants found in stored timer data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityIssue {
    #[error("task {task_id} has {count} open intervals")]
    MultipleOpenIntervals { task_id: String, count: usize },

    #[error("task {task_id} is_active={is_active} disagrees with its intervals")]
    ActiveFlagMismatch { task_id: String, is_active: bool },

    #[error("{} tasks are active at once: {}", .task_ids.len(), .task_ids.join(", "))]
    MultipleActiveTasks { task_ids: Vec<String> },
}

impl From<IntegrityIssue> for TimerError {
    fn from(value: IntegrityIssue) -> Self {
        Self::DataIntegrity(value)
    }
}
