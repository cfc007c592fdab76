use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{Project, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskSortKey {
    #[default]
    Recency,
    CreatedAt,
    DueDate,
    Priority,
    Title,
    Status,
    ProjectName,
}

impl TaskSortKey {
    fn name(self) -> &'static str {
        match self {
            TaskSortKey::Recency => "recency",
            TaskSortKey::CreatedAt => "created-at",
            TaskSortKey::DueDate => "due-date",
            TaskSortKey::Priority => "priority",
            TaskSortKey::Title => "title",
            TaskSortKey::Status => "status",
            TaskSortKey::ProjectName => "project-name",
        }
    }
}

impl Display for TaskSortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskSortKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "recency" | "recent" | "updated" => Ok(TaskSortKey::Recency),
            "created-at" | "created" => Ok(TaskSortKey::CreatedAt),
            "due-date" | "due" => Ok(TaskSortKey::DueDate),
            "priority" => Ok(TaskSortKey::Priority),
            "title" => Ok(TaskSortKey::Title),
            "status" => Ok(TaskSortKey::Status),
            "project-name" | "project" => Ok(TaskSortKey::ProjectName),
            other => Err(format!("unknown task sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectSortKey {
    #[default]
    Name,
    CreatedAt,
}

impl Display for ProjectSortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectSortKey::Name => f.write_str("name"),
            ProjectSortKey::CreatedAt => f.write_str("created-at"),
        }
    }
}

impl FromStr for ProjectSortKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "name" => Ok(ProjectSortKey::Name),
            "created-at" | "created" => Ok(ProjectSortKey::CreatedAt),
            other => Err(format!("unknown project sort key: {other}")),
        }
    }
}

/// Orders tasks for list views. The sort is stable, so tasks with equal keys keep their
/// incoming order. Completed tasks are dropped unless `completed_visible`.
pub fn sort_tasks<'a>(
    tasks: &'a [Task],
    projects: &[Project],
    key: TaskSortKey,
    completed_visible: bool,
) -> Vec<&'a Task> {
    let mut visible = tasks
        .iter()
        .filter(|task| completed_visible || !task.is_completed())
        .collect::<Vec<_>>();

    match key {
        TaskSortKey::Recency => visible.sort_by(|left, right| compare_recency(left, right)),
        TaskSortKey::CreatedAt => {
            visible.sort_by(|left, right| right.created_at.cmp(&left.created_at))
        }
        TaskSortKey::DueDate => visible.sort_by(|left, right| {
            match (left.due_date, right.due_date) {
                (Some(l), Some(r)) => l.cmp(&r),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }),
        TaskSortKey::Priority => visible.sort_by_key(|task| {
            let rank = task.priority.map(|priority| i16::from(priority.rank())).unwrap_or(-1);
            std::cmp::Reverse(rank)
        }),
        TaskSortKey::Title => visible.sort_by_cached_key(|task| fold_case(&task.title)),
        TaskSortKey::Status => visible.sort_by_cached_key(|task| {
            fold_case(task.status.map(|status| status.label()).unwrap_or(""))
        }),
        TaskSortKey::ProjectName => {
            let names = projects
                .iter()
                .map(|project| (project.id.as_str(), fold_case(&project.name)))
                .collect::<HashMap<_, _>>();
            visible.sort_by_cached_key(|task| {
                task.project_id
                    .as_deref()
                    .and_then(|id| names.get(id).cloned())
                    .unwrap_or_default()
            })
        }
    }

    visible
}

pub fn sort_projects(projects: &[Project], key: ProjectSortKey) -> Vec<&Project> {
    let mut sorted = projects.iter().collect::<Vec<_>>();
    match key {
        ProjectSortKey::Name => sorted.sort_by_cached_key(|project| fold_case(&project.name)),
        ProjectSortKey::CreatedAt => {
            sorted.sort_by(|left, right| right.created_at.cmp(&left.created_at))
        }
    }
    sorted
}

fn compare_recency(left: &Task, right: &Task) -> Ordering {
    match (left.updated_at, right.updated_at) {
        (Some(l), Some(r)) => r
            .cmp(&l)
            .then_with(|| left.created_at.cmp(&right.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.created_at.cmp(&right.created_at),
    }
}

fn fold_case(value: &str) -> String {
    value.to_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::domain::{Project, Task, TaskPriority, TaskStatus};

    use super::{ProjectSortKey, TaskSortKey, sort_projects, sort_tasks};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn titles(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|task| task.title.clone()).collect()
    }

    fn plain(titles: &[&str]) -> Vec<Task> {
        titles
            .iter()
            .map(|title| {
                let mut task = Task::new(*title, base());
                task.status = None;
                task.updated_at = None;
                task
            })
            .collect()
    }

    #[test]
    fn title_sort_ignores_case() {
        let tasks = plain(&["Banana", "apple", "Cherry"]);
        let sorted = sort_tasks(&tasks, &[], TaskSortKey::Title, true);
        assert_eq!(titles(&sorted), vec!["apple", "Banana", "Cherry"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let tasks = plain(&["one", "two", "three", "four"]);
        for key in [
            TaskSortKey::Recency,
            TaskSortKey::CreatedAt,
            TaskSortKey::DueDate,
            TaskSortKey::Priority,
            TaskSortKey::Status,
            TaskSortKey::ProjectName,
        ] {
            let sorted = sort_tasks(&tasks, &[], key, true);
            assert_eq!(titles(&sorted), vec!["one", "two", "three", "four"], "{key}");
        }
    }

    #[test]
    fn hides_completed_unless_visible() {
        let mut tasks = plain(&["open", "done", "flagged"]);
        tasks[1].status = Some(TaskStatus::Done);
        tasks[2].completed = true;

        let hidden = sort_tasks(&tasks, &[], TaskSortKey::Title, false);
        assert_eq!(titles(&hidden), vec!["open"]);
        let shown = sort_tasks(&tasks, &[], TaskSortKey::Title, true);
        assert_eq!(shown.len(), 3);
    }

    #[test]
    fn recency_puts_untimestamped_last_by_creation() {
        let mut tasks = plain(&["old-stamp", "late-none", "new-stamp", "early-none"]);
        tasks[0].updated_at = Some(base() + Duration::hours(1));
        tasks[1].created_at = base() + Duration::hours(5);
        tasks[2].updated_at = Some(base() + Duration::hours(3));
        tasks[3].created_at = base() - Duration::hours(5);

        let sorted = sort_tasks(&tasks, &[], TaskSortKey::Recency, true);
        assert_eq!(
            titles(&sorted),
            vec!["new-stamp", "old-stamp", "early-none", "late-none"]
        );
    }

    #[test]
    fn recency_ties_fall_back_to_creation() {
        let mut tasks = plain(&["younger", "older"]);
        for task in &mut tasks {
            task.updated_at = Some(base() + Duration::hours(2));
        }
        tasks[0].created_at = base() + Duration::minutes(30);

        let sorted = sort_tasks(&tasks, &[], TaskSortKey::Recency, true);
        assert_eq!(titles(&sorted), vec!["older", "younger"]);
    }

    #[test]
    fn due_date_ascending_with_missing_last() {
        let mut tasks = plain(&["none-a", "later", "none-b", "sooner"]);
        tasks[1].due_date = Some(base() + Duration::days(3));
        tasks[3].due_date = Some(base() + Duration::days(1));

        let sorted = sort_tasks(&tasks, &[], TaskSortKey::DueDate, true);
        assert_eq!(titles(&sorted), vec!["sooner", "later", "none-a", "none-b"]);
    }

    #[test]
    fn priority_descending_with_missing_lowest() {
        let mut tasks = plain(&["none", "low", "urgent", "medium", "high"]);
        tasks[1].priority = Some(TaskPriority::Low);
        tasks[2].priority = Some(TaskPriority::Urgent);
        tasks[3].priority = Some(TaskPriority::Medium);
        tasks[4].priority = Some(TaskPriority::High);

        let sorted = sort_tasks(&tasks, &[], TaskSortKey::Priority, true);
        assert_eq!(
            titles(&sorted),
            vec!["urgent", "high", "medium", "low", "none"]
        );
    }

    #[test]
    fn status_and_created_at_keys() {
        let mut tasks = plain(&["ready", "none", "hold"]);
        tasks[0].status = Some(TaskStatus::Ready);
        tasks[2].status = Some(TaskStatus::OnHold);
        tasks[2].created_at = base() + Duration::days(1);

        let by_status = sort_tasks(&tasks, &[], TaskSortKey::Status, true);
        assert_eq!(titles(&by_status), vec!["none", "hold", "ready"]);

        let by_created = sort_tasks(&tasks, &[], TaskSortKey::CreatedAt, true);
        assert_eq!(titles(&by_created), vec!["hold", "ready", "none"]);
    }

    #[test]
    fn project_name_sorts_unassigned_first() {
        let zoo = Project::new("zoo", base());
        let alpha = Project::new("Alpha", base());
        let mut tasks = plain(&["in-zoo", "loose", "in-alpha", "ghost"]);
        tasks[0].project_id = Some(zoo.id.clone());
        tasks[2].project_id = Some(alpha.id.clone());
        tasks[3].project_id = Some("deleted".to_string());

        let projects = vec![zoo, alpha];
        let sorted = sort_tasks(&tasks, &projects, TaskSortKey::ProjectName, true);
        assert_eq!(titles(&sorted), vec!["loose", "ghost", "in-alpha", "in-zoo"]);
    }

    #[test]
    fn sorts_projects_by_name_and_age() {
        let projects = vec![
            Project::new("beta", base()),
            Project::new("Alpha", base() + Duration::days(2)),
            Project::new("gamma", base() + Duration::days(1)),
        ];

        let by_name = sort_projects(&projects, ProjectSortKey::Name);
        assert_eq!(
            by_name.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha", "beta", "gamma"]
        );
        let by_age = sort_projects(&projects, ProjectSortKey::CreatedAt);
        assert_eq!(
            by_age.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha", "gamma", "beta"]
        );
    }

    #[test]
    fn sort_keys_round_trip_through_names() {
        for key in [TaskSortKey::Recency, TaskSortKey::DueDate, TaskSortKey::ProjectName] {
            assert_eq!(key.to_string().parse::<TaskSortKey>(), Ok(key));
        }
        assert_eq!("Project".parse::<TaskSortKey>(), Ok(TaskSortKey::ProjectName));
        assert_eq!("created_at".parse::<ProjectSortKey>(), Ok(ProjectSortKey::CreatedAt));
    }
}
