use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

const ID_LEN: usize = 8;

/// One contiguous span of tracked work on a task. `end_time == None` means the span is
/// still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TimeInterval {
    pub fn open(task_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            task_id: task_id.into(),
            start_time,
            end_time: None,
            note: None,
        }
    }

    pub fn closed(
        task_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            task_id: task_id.into(),
            start_time,
            end_time: Some(end_time),
            note,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Effective end when resolved against `as_of`.
    pub fn end_or(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        self.end_time.unwrap_or(as_of)
    }

    /// Tracked time, never negative. An open interval accrues up to `as_of`.
    pub fn duration(&self, as_of: DateTime<Utc>) -> Duration {
        let elapsed = self.end_or(as_of) - self.start_time;
        elapsed.max(Duration::zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Done,
    OnHold,
    Cancelled,
    Ready,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Completed",
            TaskStatus::OnHold => "On Hold",
            TaskStatus::Cancelled => "Cancelled",
            TaskStatus::Ready => "Ready",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().replace([' ', '_'], "-").as_str() {
            "not-started" | "todo" => Ok(TaskStatus::NotStarted),
            "in-progress" => Ok(TaskStatus::InProgress),
            "done" | "completed" => Ok(TaskStatus::Done),
            "on-hold" => Ok(TaskStatus::OnHold),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "ready" => Ok(TaskStatus::Ready),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskPriority::Low => "Low",
            TaskPriority::Medium => "Medium",
            TaskPriority::High => "High",
            TaskPriority::Urgent => "Urgent",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(format!("unknown task priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Archived,
}

impl Display for ProjectStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProjectStatus::NotStarted => "Not Started",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::Archived => "Archived",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Client {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub color: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            client_id: None,
            description: String::new(),
            color: None,
            status: ProjectStatus::NotStarted,
            created_at,
            due_date: None,
        }
    }
}

/// One checklist entry of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl TaskItem {
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            title: title.into(),
            description: None,
            created_at,
            completed: false,
        }
    }
}

/// A task and the intervals it owns. `is_active` caches "has an open interval" and is only
/// flipped by the timer coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<TaskItem>,
    /// Newest first.
    #[serde(skip)]
    pub time_intervals: Vec<TimeInterval>,
}

impl Task {
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            project_id: None,
            title: title.into(),
            description: None,
            status: Some(TaskStatus::NotStarted),
            priority: None,
            completed: false,
            created_at,
            updated_at: Some(created_at),
            due_date: None,
            is_active: false,
            items: Vec::new(),
            time_intervals: Vec::new(),
        }
    }

    /// An idle copy stamped at `at`: same fields and a fresh unchecked checklist, but no
    /// tracked time.
    pub fn duplicate(&self, at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            title: format!("{} (Copy)", self.title),
            created_at: at,
            updated_at: Some(at),
            is_active: false,
            items: self
                .items
                .iter()
                .map(|item| TaskItem::new(item.title.clone(), at))
                .collect(),
            time_intervals: Vec::new(),
            ..self.clone()
        }
    }

    /// `(checked, total)` checklist counts.
    pub fn checklist_progress(&self) -> (usize, usize) {
        let done = self.items.iter().filter(|item| item.completed).count();
        (done, self.items.len())
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.completed || self.status == Some(TaskStatus::Done)
    }

    pub fn interval(&self, interval_id: &str) -> Option<&TimeInterval> {
        self.time_intervals
            .iter()
            .find(|interval| interval.id == interval_id)
    }

    pub fn short_title(&self) -> String {
        self.title
            .lines()
            .next()
            .filter(|line| !line.trim().is_empty())
            .unwrap_or("(untitled)")
            .to_string()
    }
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        Task, TaskItem, TaskPriority, TaskStatus, TimeInterval, format_duration, generate_id,
    };

    #[test]
    fn open_interval_accrues_until_as_of() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let interval = TimeInterval::open("task", start);
        assert!(interval.is_open());
        assert_eq!(
            interval.duration(start + Duration::minutes(90)),
            Duration::minutes(90)
        );
        assert_eq!(
            interval.duration(start - Duration::minutes(5)),
            Duration::zero()
        );
    }

    #[test]
    fn completion_follows_flag_or_done_status() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut task = Task::new("Write report", now);
        assert!(!task.is_completed());
        task.status = Some(TaskStatus::Done);
        assert!(task.is_completed());
        task.status = Some(TaskStatus::InProgress);
        task.completed = true;
        assert!(task.is_completed());
    }

    #[test]
    fn parses_status_and_priority_labels() {
        assert_eq!("In Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("on_hold".parse::<TaskStatus>(), Ok(TaskStatus::OnHold));
        assert_eq!("URGENT".parse::<TaskPriority>(), Ok(TaskPriority::Urgent));
        assert!("someday".parse::<TaskPriority>().is_err());
        assert!(TaskPriority::Urgent.rank() > TaskPriority::High.rank());
    }

    #[test]
    fn formats_durations_and_generates_ids() {
        assert_eq!(format_duration(Duration::seconds(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::seconds(-4)), "00:00:00");
        let id = generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn duplicate_is_idle_and_untracked() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let later = now + Duration::days(2);
        let mut task = Task::new("Plan trip", now).with_project("p1");
        task.priority = Some(TaskPriority::High);
        task.is_active = true;
        task.time_intervals.push(TimeInterval::open(task.id.clone(), now));
        let mut item = TaskItem::new("Book hotel", now);
        item.completed = true;
        task.items.push(item);

        let copy = task.duplicate(later);
        assert_ne!(copy.id, task.id);
        assert_eq!(copy.title, "Plan trip (Copy)");
        assert_eq!(copy.project_id.as_deref(), Some("p1"));
        assert_eq!(copy.priority, Some(TaskPriority::High));
        assert!(!copy.is_active);
        assert!(copy.time_intervals.is_empty());
        assert_eq!(copy.created_at, later);
        assert_eq!(copy.items.len(), 1);
        assert_eq!(copy.items[0].title, "Book hotel");
        assert_ne!(copy.items[0].id, task.items[0].id);
        assert_eq!(copy.checklist_progress(), (0, 1));
        assert_eq!(task.checklist_progress(), (1, 1));
    }
}
