//! Single-active-timer coordination.
//!
//! # Invariants
//! - At most one task in the store has `is_active == true` once any transition returns.
//! - `is_active` is only written here, inside the same lock that writes the intervals.
//! - A transition commits through one `TaskStore::save` batch, so callers never observe
//!   zero or two active tasks halfway through a start.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::{Task, TimeInterval};
use crate::error::{IntegrityIssue, TimerError, TimerResult};
use crate::store::{TaskQuery, TaskStore};
use crate::timer::{checked_open_interval, close, last_end, open_interval};

/// What a `start`/`stop` call changed. Empty for idempotent no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub started: Option<String>,
    pub stopped: Vec<String>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.started.is_none() && self.stopped.is_empty()
    }
}

/// Requested changes to a recorded interval. `None` keeps the current value; an empty
/// note clears it.
#[derive(Debug, Clone, Default)]
pub struct IntervalEdit {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// The open interval left running, as `(task_id, interval_id)`.
    pub kept: Option<(String, String)>,
    /// Open intervals that were force-closed, as `(task_id, interval_id)`.
    pub closed: Vec<(String, String)>,
    /// Tasks whose `is_active` cache was rewritten.
    pub flags_fixed: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.closed.is_empty() && self.flags_fixed.is_empty()
    }
}

pub struct TimerCoordinator<S> {
    store: Mutex<S>,
}

impl<S: TaskStore> TimerCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn into_inner(self) -> TimerResult<S> {
        self.store.into_inner().map_err(|_| TimerError::LockPoisoned)
    }

    fn lock(&self) -> TimerResult<MutexGuard<'_, S>> {
        self.store.lock().map_err(|_| TimerError::LockPoisoned)
    }

    /// Starts timing `task_id` at `at`, closing whichever task was running.
    pub fn start(&self, task_id: &str, at: DateTime<Utc>) -> TimerResult<Transition> {
        let mut store = self.lock()?;
        let mut task = store.load(task_id)?;

        if checked_open_interval(&task)?.is_some() {
            debug!(task_id, "timer already running");
            return Ok(Transition::default());
        }

        if let Some(last) = last_end(&task) {
            if at < last {
                return Err(TimerError::invalid_interval(format!(
                    "start {} is earlier than the last recorded end {} of task {}",
                    at.to_rfc3339(),
                    last.to_rfc3339(),
                    task.id
                )));
            }
        }

        let others = store
            .query(&TaskQuery::active())
            .into_iter()
            .filter(|other| other.id != task.id)
            .collect::<Vec<_>>();
        if others.len() > 1 {
            warn!(
                count = others.len(),
                "more than one task was active; closing all of them"
            );
        }

        let mut transition = Transition {
            started: Some(task.id.clone()),
            stopped: Vec::with_capacity(others.len()),
        };
        let mut changed = Vec::with_capacity(others.len() + 1);
        for mut other in others {
            if stop_in_place(&mut other, at)? {
                transition.stopped.push(other.id.clone());
            }
            changed.push(other);
        }

        task.time_intervals
            .insert(0, TimeInterval::open(task.id.clone(), at));
        task.is_active = true;
        task.updated_at = Some(at);
        changed.push(task);

        store.save(changed)?;
        info!(
            task_id,
            stopped = ?transition.stopped,
            at = %at.to_rfc3339(),
            "timer started"
        );
        Ok(transition)
    }

    /// Stops `task_id` at `at`. Stopping an idle task is a no-op.
    pub fn stop(&self, task_id: &str, at: DateTime<Utc>) -> TimerResult<Transition> {
        let mut store = self.lock()?;
        let mut task = store.load(task_id)?;

        if !stop_in_place(&mut task, at)? {
            debug!(task_id, "timer already idle");
            return Ok(Transition::default());
        }

        let transition = Transition {
            started: None,
            stopped: vec![task.id.clone()],
        };
        store.save(vec![task])?;
        info!(task_id, at = %at.to_rfc3339(), "timer stopped");
        Ok(transition)
    }

    /// Records a finished span of work entered by hand. The span may not end after `now`
    /// or overlap the task's running interval.
    pub fn log_interval(
        &self,
        task_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> TimerResult<TimeInterval> {
        if end < start {
            return Err(TimerError::end_before_start(start, end));
        }
        reject_future_end(end, now)?;

        let mut store = self.lock()?;
        let mut task = store.load(task_id)?;
        if let Some(running) = checked_open_interval(&task)? {
            reject_running_overlap(end, running)?;
        }

        let interval = TimeInterval::closed(task.id.clone(), start, end, normalize_note(note));
        let position = task
            .time_intervals
            .iter()
            .position(|existing| existing.start_time <= start)
            .unwrap_or(task.time_intervals.len());
        task.time_intervals.insert(position, interval.clone());

        store.save(vec![task])?;
        info!(task_id, interval_id = %interval.id, "manual interval recorded");
        Ok(interval)
    }

    /// Applies a manual edit. Closed intervals stay closed and open ones stay open; use
    /// `stop` to end a running timer. A running interval cannot start before the task's
    /// last recorded end, and a closed one cannot end after `now` or after the running
    /// interval began.
    pub fn edit_interval(
        &self,
        task_id: &str,
        interval_id: &str,
        edit: IntervalEdit,
        now: DateTime<Utc>,
    ) -> TimerResult<TimeInterval> {
        let mut store = self.lock()?;
        let mut task = store.load(task_id)?;
        let running = checked_open_interval(&task)?.cloned();
        let last = last_end(&task);

        let slot = task
            .time_intervals
            .iter_mut()
            .find(|interval| interval.id == interval_id)
            .ok_or_else(|| TimerError::interval_not_found(interval_id))?;

        let start = edit.start_time.unwrap_or(slot.start_time);
        match slot.end_time {
            None => {
                if edit.end_time.is_some() {
                    return Err(TimerError::invalid_interval(
                        "a running interval is closed by stopping its timer",
                    ));
                }
                if start > now {
                    return Err(TimerError::invalid_interval(format!(
                        "running interval cannot start in the future ({})",
                        start.to_rfc3339()
                    )));
                }
                if let Some(last) = last {
                    if start < last {
                        return Err(TimerError::invalid_interval(format!(
                            "running interval cannot start at {}, before the last recorded end {}",
                            start.to_rfc3339(),
                            last.to_rfc3339()
                        )));
                    }
                }
            }
            Some(current_end) => {
                let end = edit.end_time.unwrap_or(current_end);
                if end < start {
                    return Err(TimerError::end_before_start(start, end));
                }
                reject_future_end(end, now)?;
                if let Some(running) = &running {
                    reject_running_overlap(end, running)?;
                }
                slot.end_time = Some(end);
            }
        }
        slot.start_time = start;
        if let Some(note) = edit.note {
            slot.note = normalize_note(Some(note));
        }
        let edited = slot.clone();

        store.save(vec![task])?;
        info!(task_id, interval_id, "interval edited");
        Ok(edited)
    }

    /// Deletes a closed interval. The running interval must be stopped first.
    pub fn delete_interval(&self, task_id: &str, interval_id: &str) -> TimerResult<TimeInterval> {
        let mut store = self.lock()?;
        let mut task = store.load(task_id)?;
        let index = task
            .time_intervals
            .iter()
            .position(|interval| interval.id == interval_id)
            .ok_or_else(|| TimerError::interval_not_found(interval_id))?;
        if task.time_intervals[index].is_open() {
            return Err(TimerError::invalid_interval(
                "stop the timer before deleting its running interval",
            ));
        }

        let removed = task.time_intervals.remove(index);
        store.save(vec![task])?;
        info!(task_id, interval_id, "interval deleted");
        Ok(removed)
    }

    /// Removes a task and every interval it owns, running or not.
    pub fn delete_task(&self, task_id: &str) -> TimerResult<Task> {
        let mut store = self.lock()?;
        let removed = store.remove(task_id)?;
        info!(
            task_id,
            intervals = removed.time_intervals.len(),
            was_active = removed.is_active,
            "task deleted"
        );
        Ok(removed)
    }

    /// Consistent copy of every task, for read-only aggregation and sorting.
    pub fn snapshot(&self) -> TimerResult<Vec<Task>> {
        let store = self.lock()?;
        Ok(store.query(&TaskQuery::all()))
    }

    pub fn active_task(&self) -> TimerResult<Option<Task>> {
        let store = self.lock()?;
        Ok(store.query(&TaskQuery::active()).into_iter().next())
    }

    /// Returns the first broken invariant found, if any.
    pub fn verify(&self) -> TimerResult<()> {
        let store = self.lock()?;
        let mut active = Vec::new();
        for task in store.query(&TaskQuery::all()) {
            if checked_open_interval(&task)?.is_some() {
                active.push(task.id);
            }
        }
        if active.len() > 1 {
            return Err(IntegrityIssue::MultipleActiveTasks { task_ids: active }.into());
        }
        Ok(())
    }

    /// Closes every open interval except the most recently started one, each at the moment
    /// that newest interval began, and rewrites `is_active` to match.
    pub fn repair(&self) -> TimerResult<RepairReport> {
        let mut store = self.lock()?;
        let mut tasks = store.query(&TaskQuery::all());

        let keeper = tasks
            .iter()
            .flat_map(|task| task.time_intervals.iter())
            .filter(|interval| interval.is_open())
            .max_by(|left, right| {
                left.start_time
                    .cmp(&right.start_time)
                    .then_with(|| right.id.cmp(&left.id))
            })
            .map(|interval| (interval.task_id.clone(), interval.id.clone(), interval.start_time));

        let mut report = RepairReport {
            kept: keeper
                .as_ref()
                .map(|(task_id, interval_id, _)| (task_id.clone(), interval_id.clone())),
            ..RepairReport::default()
        };
        let mut changed = Vec::new();

        for task in &mut tasks {
            let mut touched = false;
            for slot in task.time_intervals.iter_mut() {
                if !slot.is_open() {
                    continue;
                }
                let Some((_, keep_id, keep_start)) = &keeper else {
                    continue;
                };
                if &slot.id == keep_id {
                    continue;
                }
                *slot = close(slot, *keep_start)?;
                warn!(
                    task_id = %task.id,
                    interval_id = %slot.id,
                    closed_at = %keep_start.to_rfc3339(),
                    "force-closed stray open interval"
                );
                report.closed.push((task.id.clone(), slot.id.clone()));
                touched = true;
            }

            let running = open_interval(task)?.is_some();
            if task.is_active != running {
                warn!(
                    task_id = %task.id,
                    was = task.is_active,
                    now = running,
                    "rewrote stale active flag"
                );
                task.is_active = running;
                report.flags_fixed.push(task.id.clone());
                touched = true;
            }

            if touched {
                changed.push(task.clone());
            }
        }

        if !changed.is_empty() {
            store.save(changed)?;
        }
        Ok(report)
    }
}

/// Closes the open interval of `task` at `at`. Returns `false` when nothing was running.
fn stop_in_place(task: &mut Task, at: DateTime<Utc>) -> TimerResult<bool> {
    let Some(open) = checked_open_interval(task)? else {
        return Ok(false);
    };
    let closed = close(open, at)?;
    if let Some(slot) = task
        .time_intervals
        .iter_mut()
        .find(|interval| interval.is_open())
    {
        *slot = closed;
    }
    task.is_active = false;
    task.updated_at = Some(at);
    Ok(true)
}

fn reject_future_end(end: DateTime<Utc>, now: DateTime<Utc>) -> TimerResult<()> {
    if end > now {
        return Err(TimerError::invalid_interval(format!(
            "end {} is in the future (now {})",
            end.to_rfc3339(),
            now.to_rfc3339()
        )));
    }
    Ok(())
}

fn reject_running_overlap(end: DateTime<Utc>, running: &TimeInterval) -> TimerResult<()> {
    if end > running.start_time {
        return Err(TimerError::invalid_interval(format!(
            "end {} overlaps running interval {} started at {}",
            end.to_rfc3339(),
            running.id,
            running.start_time.to_rfc3339()
        )));
    }
    Ok(())
}

fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty())
}
