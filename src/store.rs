//! Task store contract and the in-memory [`Ledger`] that implements it.
//!
//! The timer core only talks to [`TaskStore`]; persistence of a `Ledger` lives in
//! `storage`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::{Client, Project, Task, TaskItem, TaskStatus};
use crate::error::{TimerError, TimerResult};

/// Filter for [`TaskStore::query`].
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub active_only: bool,
    pub project_id: Option<String>,
    pub include_completed: bool,
}

impl TaskQuery {
    pub fn all() -> Self {
        Self {
            include_completed: true,
            ..Self::default()
        }
    }

    pub fn active() -> Self {
        Self {
            active_only: true,
            include_completed: true,
            ..Self::default()
        }
    }

    fn matches(&self, task: &Task) -> bool {
        if self.active_only && !task.is_active {
            return false;
        }
        if !self.include_completed && task.is_completed() {
            return false;
        }
        match &self.project_id {
            Some(project_id) => task.project_id.as_deref() == Some(project_id.as_str()),
            None => true,
        }
    }
}

/// Storage seam for tasks and the intervals they own.
pub trait TaskStore {
    /// Point-in-time copy of one task.
    fn load(&self, task_id: &str) -> TimerResult<Task>;

    /// Inserts or replaces every task in `tasks`. Either the whole batch is applied or none
    /// of it.
    fn save(&mut self, tasks: Vec<Task>) -> TimerResult<()>;

    /// Tasks matching `query`, in store order.
    fn query(&self, query: &TaskQuery) -> Vec<Task>;

    /// Removes a task together with its intervals.
    fn remove(&mut self, task_id: &str) -> TimerResult<Task>;
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub clients: Vec<Client>,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            created_at: Utc::now(),
            clients: Vec::new(),
            projects: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|client| client.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn add_project(
        &mut self,
        name: String,
        color: Option<String>,
        created_at: DateTime<Utc>,
    ) -> String {
        let mut project = Project::new(name, created_at);
        project.color = color;
        let id = project.id.clone();
        self.projects.push(project);
        id
    }

    pub fn add_client(&mut self, name: String, email: Option<String>) -> String {
        let client = Client::new(name, email.unwrap_or_default());
        let id = client.id.clone();
        self.clients.push(client);
        id
    }

    pub fn assign_client(&mut self, project_id: &str, client_id: &str) -> TimerResult<()> {
        if self.client(client_id).is_none() {
            return Err(TimerError::client_not_found(client_id));
        }
        let project = self
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
            .ok_or_else(|| TimerError::project_not_found(project_id))?;
        project.client_id = Some(client_id.to_string());
        Ok(())
    }

    /// Drops a client, its projects, and every task inside those projects.
    pub fn remove_client(&mut self, client_id: &str) -> TimerResult<Client> {
        let index = self
            .clients
            .iter()
            .position(|client| client.id == client_id)
            .ok_or_else(|| TimerError::client_not_found(client_id))?;
        let owned = self
            .projects
            .iter()
            .filter(|project| project.client_id.as_deref() == Some(client_id))
            .map(|project| project.id.clone())
            .collect::<HashSet<_>>();
        self.tasks.retain(|task| {
            task.project_id
                .as_ref()
                .is_none_or(|project_id| !owned.contains(project_id))
        });
        self.projects
            .retain(|project| !owned.contains(&project.id));
        Ok(self.clients.remove(index))
    }

    /// Adds an idle task. Any intervals or active flag on `task` are rejected so the
    /// coordinator stays the only place that opens timers.
    pub fn add_task(&mut self, task: Task) -> TimerResult<String> {
        if let Some(project_id) = &task.project_id {
            if self.project(project_id).is_none() {
                return Err(TimerError::project_not_found(project_id.clone()));
            }
        }
        if task.is_active || !task.time_intervals.is_empty() {
            return Err(TimerError::invalid_interval(
                "new tasks must start without intervals",
            ));
        }
        if self.task(&task.id).is_some() {
            return Err(TimerError::invalid_interval(format!(
                "task id already exists: {}",
                task.id
            )));
        }

        let id = task.id.clone();
        self.tasks.push(task);
        Ok(id)
    }

    pub fn complete_task(&mut self, task_id: &str, at: DateTime<Utc>) -> TimerResult<()> {
        let task = self.task_mut(task_id)?;
        task.completed = true;
        task.status = Some(TaskStatus::Done);
        task.updated_at = Some(at);
        Ok(())
    }

    /// Inserts an idle copy of `task_id` right after it and returns the copy's id.
    pub fn duplicate_task(&mut self, task_id: &str, at: DateTime<Utc>) -> TimerResult<String> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| TimerError::task_not_found(task_id))?;
        let copy = self.tasks[index].duplicate(at);
        let id = copy.id.clone();
        self.tasks.insert(index + 1, copy);
        Ok(id)
    }

    pub fn add_item(
        &mut self,
        task_id: &str,
        title: String,
        at: DateTime<Utc>,
    ) -> TimerResult<String> {
        let task = self.task_mut(task_id)?;
        let item = TaskItem::new(title, at);
        let id = item.id.clone();
        task.items.push(item);
        Ok(id)
    }

    pub fn set_item_completed(
        &mut self,
        task_id: &str,
        item_id: &str,
        completed: bool,
    ) -> TimerResult<()> {
        let item = self
            .task_mut(task_id)?
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| TimerError::item_not_found(item_id))?;
        item.completed = completed;
        Ok(())
    }

    pub fn remove_item(&mut self, task_id: &str, item_id: &str) -> TimerResult<TaskItem> {
        let task = self.task_mut(task_id)?;
        let index = task
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| TimerError::item_not_found(item_id))?;
        Ok(task.items.remove(index))
    }

    /// Drops a project and every task inside it.
    pub fn remove_project(&mut self, project_id: &str) -> TimerResult<Project> {
        let index = self
            .projects
            .iter()
            .position(|project| project.id == project_id)
            .ok_or_else(|| TimerError::project_not_found(project_id))?;
        self.tasks
            .retain(|task| task.project_id.as_deref() != Some(project_id));
        Ok(self.projects.remove(index))
    }

    pub fn tasks_in_project(&self, project_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.project_id.as_deref() == Some(project_id))
            .collect()
    }

    fn task_mut(&mut self, task_id: &str) -> TimerResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| TimerError::task_not_found(task_id))
    }
}

impl TaskStore for Ledger {
    fn load(&self, task_id: &str) -> TimerResult<Task> {
        self.task(task_id)
            .cloned()
            .ok_or_else(|| TimerError::task_not_found(task_id))
    }

    fn save(&mut self, tasks: Vec<Task>) -> TimerResult<()> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(TimerError::invalid_interval(format!(
                    "task {} appears twice in one save",
                    task.id
                )));
            }
            if let Some(project_id) = &task.project_id {
                if self.project(project_id).is_none() {
                    return Err(TimerError::project_not_found(project_id.clone()));
                }
            }
        }

        for task in tasks {
            match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
                Some(existing) => *existing = task,
                None => self.tasks.push(task),
            }
        }
        Ok(())
    }

    fn query(&self, query: &TaskQuery) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| query.matches(task))
            .cloned()
            .collect()
    }

    fn remove(&mut self, task_id: &str) -> TimerResult<Task> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| TimerError::task_not_found(task_id))?;
        Ok(self.tasks.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::coordinator::TimerCoordinator;
    use crate::domain::{Task, TimeInterval};
    use crate::error::TimerError;

    use super::{Ledger, TaskQuery, TaskStore};

    #[test]
    fn rejects_tasks_for_unknown_projects() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let err = ledger
            .add_task(Task::new("Orphan", now).with_project("missing"))
            .expect_err("unknown project must fail");
        assert_eq!(err, TimerError::project_not_found("missing"));
    }

    #[test]
    fn new_tasks_cannot_carry_intervals() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let mut task = Task::new("Sneaky", now);
        task.time_intervals.push(TimeInterval::open(task.id.clone(), now));
        task.is_active = true;
        assert!(matches!(
            ledger.add_task(task),
            Err(TimerError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn save_replaces_whole_batch_or_nothing() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let id = ledger.add_task(Task::new("Draft", now)).expect("task");

        let mut renamed = ledger.load(&id).expect("load");
        renamed.title = "Final".to_string();
        let bad = Task::new("Bad", now).with_project("missing");
        assert!(ledger.save(vec![renamed.clone(), bad]).is_err());
        assert_eq!(ledger.load(&id).expect("load").title, "Draft");

        ledger.save(vec![renamed]).expect("save");
        assert_eq!(ledger.load(&id).expect("load").title, "Final");
    }

    #[test]
    fn query_filters_active_project_and_completed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let project = ledger.add_project("Home".to_string(), None, now);
        let a = ledger
            .add_task(Task::new("Paint", now).with_project(project.clone()))
            .expect("task");
        let b = ledger.add_task(Task::new("Loose", now)).expect("task");
        ledger.complete_task(&b, now).expect("complete");

        let in_project = ledger.query(&TaskQuery {
            project_id: Some(project),
            include_completed: true,
            ..TaskQuery::default()
        });
        assert_eq!(in_project.len(), 1);
        assert_eq!(in_project[0].id, a);

        let open_work = ledger.query(&TaskQuery::default());
        assert_eq!(open_work.len(), 1);
        assert!(ledger.query(&TaskQuery::active()).is_empty());
        assert_eq!(ledger.query(&TaskQuery::all()).len(), 2);
    }

    #[test]
    fn removing_project_cascades_to_tasks() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let project = ledger.add_project("Garden".to_string(), None, now);
        ledger
            .add_task(Task::new("Weed", now).with_project(project.clone()))
            .expect("task");
        let keep = ledger.add_task(Task::new("Other", now)).expect("task");

        ledger.remove_project(&project).expect("remove");
        assert_eq!(ledger.tasks.len(), 1);
        assert_eq!(ledger.tasks[0].id, keep);
        assert!(ledger.remove_project(&project).is_err());
    }

    #[test]
    fn duplicate_of_running_task_is_idle() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let first = ledger.add_task(Task::new("Review", now)).expect("task");
        let second = ledger.add_task(Task::new("Ship", now)).expect("task");

        let timers = TimerCoordinator::new(ledger);
        timers.start(&first, now).expect("start");
        let mut ledger = timers.into_inner().expect("ledger");

        let copy = ledger
            .duplicate_task(&first, now + Duration::hours(1))
            .expect("duplicate");
        let ids = ledger.tasks.iter().map(|task| task.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![first.clone(), copy.clone(), second]);

        let copy = ledger.load(&copy).expect("copy");
        assert!(!copy.is_active);
        assert!(copy.time_intervals.is_empty());
        assert_eq!(ledger.query(&TaskQuery::active()).len(), 1);
        assert!(ledger.duplicate_task("missing", now).is_err());
    }

    #[test]
    fn checklist_items_track_progress() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let task = ledger.add_task(Task::new("Move flat", now)).expect("task");
        let boxes = ledger
            .add_item(&task, "Buy boxes".to_string(), now)
            .expect("item");
        let van = ledger
            .add_item(&task, "Rent van".to_string(), now)
            .expect("item");

        ledger.set_item_completed(&task, &boxes, true).expect("check");
        assert_eq!(ledger.load(&task).expect("load").checklist_progress(), (1, 2));

        ledger.remove_item(&task, &van).expect("remove");
        assert_eq!(ledger.load(&task).expect("load").checklist_progress(), (1, 1));
        assert_eq!(
            ledger.set_item_completed(&task, &van, true),
            Err(TimerError::item_not_found(van.clone()))
        );
    }

    #[test]
    fn removing_client_cascades_to_projects_and_tasks() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let client = ledger.add_client("Acme".to_string(), None);
        let billed = ledger.add_project("Website".to_string(), None, now);
        let internal = ledger.add_project("Admin".to_string(), None, now);
        ledger.assign_client(&billed, &client).expect("assign");
        assert!(ledger.assign_client(&internal, "missing").is_err());

        ledger
            .add_task(Task::new("Landing page", now).with_project(billed.clone()))
            .expect("task");
        let kept = ledger
            .add_task(Task::new("Taxes", now).with_project(internal.clone()))
            .expect("task");
        let loose = ledger.add_task(Task::new("Inbox", now)).expect("task");

        let removed = ledger.remove_client(&client).expect("remove");
        assert_eq!(removed.name, "Acme");
        assert!(ledger.clients.is_empty());
        assert_eq!(ledger.projects.len(), 1);
        assert_eq!(ledger.projects[0].id, internal);
        let ids = ledger.tasks.iter().map(|task| task.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![kept, loose]);
    }
}
