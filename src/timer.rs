use chrono::{DateTime, Duration, Utc};

use crate::domain::{Task, TimeInterval};
use crate::error::{IntegrityIssue, TimerError, TimerResult};

/// Total tracked time of `task`, with any open interval running up to `as_of`.
pub fn elapsed_duration(task: &Task, as_of: DateTime<Utc>) -> Duration {
    task.time_intervals
        .iter()
        .fold(Duration::zero(), |total, interval| {
            total + interval.duration(as_of)
        })
}

/// The single running interval of `task`, if any.
pub fn open_interval(task: &Task) -> TimerResult<Option<&TimeInterval>> {
    let mut open = task.time_intervals.iter().filter(|interval| interval.is_open());
    let first = open.next();
    let extra = open.count();
    if extra > 0 {
        return Err(IntegrityIssue::MultipleOpenIntervals {
            task_id: task.id.clone(),
            count: extra + 1,
        }
        .into());
    }
    Ok(first)
}

/// A closed copy of `interval` ending at `at`.
pub fn close(interval: &TimeInterval, at: DateTime<Utc>) -> TimerResult<TimeInterval> {
    if let Some(end) = interval.end_time {
        return Err(TimerError::invalid_interval(format!(
            "interval {} already ended at {}",
            interval.id,
            end.to_rfc3339()
        )));
    }
    if at < interval.start_time {
        return Err(TimerError::end_before_start(interval.start_time, at));
    }

    let mut closed = interval.clone();
    closed.end_time = Some(at);
    Ok(closed)
}

/// Latest recorded end among the closed intervals of `task`.
pub fn last_end(task: &Task) -> Option<DateTime<Utc>> {
    task.time_intervals
        .iter()
        .filter_map(|interval| interval.end_time)
        .max()
}

/// Checks that `is_active` agrees with the task's intervals and returns the open one.
pub(crate) fn checked_open_interval(task: &Task) -> TimerResult<Option<&TimeInterval>> {
    let open = open_interval(task)?;
    if open.is_some() != task.is_active {
        return Err(IntegrityIssue::ActiveFlagMismatch {
            task_id: task.id.clone(),
            is_active: task.is_active,
        }
        .into());
    }
    Ok(open)
}
