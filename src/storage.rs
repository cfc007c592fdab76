use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Client, Project, Task, TimeInterval};
use crate::store::Ledger;

const INTERVALS_MARKER: &str = "\n=== INTERVALS ===\n";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML header: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to encode TOML header: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("failed to parse JSONL interval on line {line}: {source}")]
    JsonDecode {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode JSONL interval: {0}")]
    JsonEncode(serde_json::Error),
    #[error("invalid ledger data: {0}")]
    InvalidData(String),
}

#[derive(Serialize)]
struct HeaderOut<'a> {
    schema_version: u32,
    created_at: DateTime<Utc>,
    clients: &'a [Client],
    projects: &'a [Project],
    tasks: &'a [Task],
}

#[derive(Deserialize)]
struct HeaderIn {
    schema_version: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    clients: Vec<Client>,
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    tasks: Vec<Task>,
}

pub fn load_ledger(path: &Path) -> Result<Ledger, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Ledger::new()),
        Err(err) => return Err(StorageError::Io(err)),
    };

    if raw.trim().is_empty() {
        return Ok(Ledger::new());
    }

    let (header_blob, intervals_blob) = raw
        .split_once(INTERVALS_MARKER)
        .unwrap_or((raw.as_str(), ""));

    let header: HeaderIn = toml::from_str(header_blob)?;
    let mut tasks = header.tasks;
    let index = tasks
        .iter()
        .enumerate()
        .map(|(position, task)| (task.id.clone(), position))
        .collect::<HashMap<_, _>>();

    let mut count = 0usize;
    for (offset, line) in intervals_blob.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let interval: TimeInterval = serde_json::from_str(line).map_err(|source| {
            StorageError::JsonDecode {
                line: offset + 1,
                source,
            }
        })?;
        if let Some(end) = interval.end_time {
            if end < interval.start_time {
                return Err(StorageError::InvalidData(format!(
                    "interval {} ends before it starts",
                    interval.id
                )));
            }
        }
        let position = *index.get(&interval.task_id).ok_or_else(|| {
            StorageError::InvalidData(format!(
                "interval {} references unknown task {}",
                interval.id, interval.task_id
            ))
        })?;
        tasks[position].time_intervals.push(interval);
        count += 1;
    }

    debug!(
        path = %path.display(),
        tasks = tasks.len(),
        intervals = count,
        "ledger loaded"
    );
    Ok(Ledger {
        schema_version: header.schema_version,
        created_at: header.created_at,
        clients: header.clients,
        projects: header.projects,
        tasks,
    })
}

pub fn save_ledger(path: &Path, ledger: &Ledger) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let header = toml::to_string_pretty(&HeaderOut {
        schema_version: ledger.schema_version,
        created_at: ledger.created_at,
        clients: &ledger.clients,
        projects: &ledger.projects,
        tasks: &ledger.tasks,
    })?;
    let mut file = fs::File::create(path)?;
    file.write_all(header.as_bytes())?;
    file.write_all(INTERVALS_MARKER.as_bytes())?;

    for interval in ledger
        .tasks
        .iter()
        .flat_map(|task| task.time_intervals.iter())
    {
        let line = serde_json::to_string(interval).map_err(StorageError::JsonEncode)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }

    debug!(path = %path.display(), "ledger saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use std::path::PathBuf;

    use crate::coordinator::TimerCoordinator;
    use crate::domain::{Task, TaskPriority};
    use crate::store::{Ledger, TaskStore};

    use super::{StorageError, load_ledger, save_ledger};

    #[test]
    fn round_trips_toml_and_jsonl() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let client_id = ledger.add_client("Acme".to_string(), Some("ops@acme.test".to_string()));
        let project_id = ledger.add_project("Personal".to_string(), Some("blue".to_string()), now);
        ledger
            .assign_client(&project_id, &client_id)
            .expect("client should exist");
        let mut task = Task::new("Write report", now).with_project(project_id);
        task.priority = Some(TaskPriority::High);
        task.due_date = Some(now + Duration::days(7));
        let done_id = ledger.add_task(task).expect("task should be created");
        let item_id = ledger
            .add_item(&done_id, "Outline".to_string(), now)
            .expect("item should be added");
        ledger
            .set_item_completed(&done_id, &item_id, true)
            .expect("item should exist");
        let running_id = ledger
            .add_task(Task::new("Inbox zero", now))
            .expect("task should be created");

        let timers = TimerCoordinator::new(ledger);
        timers.start(&done_id, now).expect("start should work");
        timers
            .log_interval(
                &done_id,
                now - Duration::days(1),
                now - Duration::days(1) + Duration::hours(2),
                Some("deep work".to_string()),
                now,
            )
            .expect("log should work");
        timers
            .start(&running_id, now + Duration::hours(1))
            .expect("start should work");
        let ledger = timers.into_inner().expect("ledger");

        let path = temp_file("taskclock_storage_roundtrip.ledger");
        save_ledger(&path, &ledger).expect("save should succeed");
        let loaded = load_ledger(&path).expect("load should succeed");
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.clients, ledger.clients);
        assert_eq!(loaded.projects, ledger.projects);
        assert_eq!(loaded.tasks, ledger.tasks);
        let running = loaded.load(&running_id).expect("running task");
        assert!(running.is_active);
        assert!(running.time_intervals[0].is_open());
        let done = loaded.load(&done_id).expect("done task");
        assert!(!done.is_active);
        assert_eq!(done.time_intervals.len(), 2);
        assert_eq!(done.time_intervals[1].note.as_deref(), Some("deep work"));
        assert_eq!(done.checklist_progress(), (1, 1));
    }

    #[test]
    fn missing_file_is_empty_ledger() {
        let path = temp_file("taskclock_storage_missing.ledger");
        let _ = fs::remove_file(&path);
        let ledger = load_ledger(&path).expect("load should succeed");
        assert!(ledger.tasks.is_empty());
        assert!(ledger.projects.is_empty());
    }

    #[test]
    fn rejects_orphan_intervals() {
        let path = temp_file("taskclock_storage_orphan.ledger");
        fs::write(
            &path,
            "schema_version = 1\ncreated_at = \"2026-01-01T00:00:00Z\"\n\n=== INTERVALS ===\n\
             {\"id\":\"i1\",\"task_id\":\"ghost\",\"start_time\":\"2026-01-01T09:00:00Z\"}\n",
        )
        .expect("write fixture");
        let result = load_ledger(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn reports_bad_json_line() {
        let path = temp_file("taskclock_storage_badjson.ledger");
        fs::write(
            &path,
            "schema_version = 1\ncreated_at = \"2026-01-01T00:00:00Z\"\n\n=== INTERVALS ===\n\nnot json\n",
        )
        .expect("write fixture");
        let result = load_ledger(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(StorageError::JsonDecode { line: 2, .. })));
    }

    fn temp_file(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("{}_{}", name, std::process::id()));
        path
    }
}
