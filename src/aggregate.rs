//! Calendar-bucketed statistics over time intervals.
//!
//! Everything here is read-only: intervals go in, derived totals come out. Bucket
//! boundaries are local midnights in the calendar's time zone, and an interval that spans
//! a boundary is split by wall-clock overlap.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, Offset,
    TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::domain::{Task, TimeInterval};
use crate::timer::elapsed_duration;

const MAX_GAP_MINUTES: u32 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "year" | "yearly" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// Half-open `[start, end)` span of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn overlap(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
        let from = start.max(self.start);
        let to = end.min(self.end);
        if to > from { to - from } else { Duration::zero() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Local calendar date the bucket starts on.
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total: Duration,
}

/// Calendar arithmetic anchored to one time zone.
#[derive(Debug, Clone)]
pub struct Calendar<Tz: TimeZone> {
    tz: Tz,
    week_start: Weekday,
}

impl<Tz: TimeZone> Calendar<Tz> {
    pub fn new(tz: Tz, week_start: Weekday) -> Self {
        Self { tz, week_start }
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// First local date of the bucket that contains `date`.
    pub fn bucket_date(&self, date: NaiveDate, granularity: Granularity) -> NaiveDate {
        match granularity {
            Granularity::Day => date,
            Granularity::Week => {
                let offset = (date.weekday().num_days_from_monday() + 7
                    - self.week_start.num_days_from_monday())
                    % 7;
                date - Duration::days(offset.into())
            }
            Granularity::Month => date.with_day(1).expect("first of month must be valid"),
            Granularity::Year => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).expect("first of year must be valid")
            }
        }
    }

    pub fn next_bucket_date(&self, bucket_date: NaiveDate, granularity: Granularity) -> NaiveDate {
        match granularity {
            Granularity::Day => bucket_date.succ_opt().expect("next day should exist"),
            Granularity::Week => bucket_date + Duration::days(7),
            Granularity::Month => bucket_date
                .checked_add_months(Months::new(1))
                .expect("next month should exist"),
            Granularity::Year => bucket_date
                .checked_add_months(Months::new(12))
                .expect("next year should exist"),
        }
    }

    /// Instant of local midnight at the start of `date`.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight must be valid");
        local_naive_to_utc_resolved(&self.tz, midnight)
    }

    pub fn day_range(&self, first: NaiveDate, last_inclusive: NaiveDate) -> TimeRange {
        let after_last = last_inclusive.succ_opt().expect("next day should exist");
        TimeRange::new(self.start_of(first), self.start_of(after_last))
    }

    /// The calendar bucket containing `instant`.
    pub fn bucket_containing(&self, instant: DateTime<Utc>, granularity: Granularity) -> TimeRange {
        let date = self.bucket_date(self.local_date(instant), granularity);
        let next = self.next_bucket_date(date, granularity);
        TimeRange::new(self.start_of(date), self.start_of(next))
    }
}

/// Dense per-bucket totals for every calendar bucket intersecting `range`. Contributions
/// are clipped to `range`; open intervals run until `as_of`.
pub fn bucket_totals<'a, Tz: TimeZone>(
    intervals: impl IntoIterator<Item = &'a TimeInterval>,
    granularity: Granularity,
    range: TimeRange,
    calendar: &Calendar<Tz>,
    as_of: DateTime<Utc>,
) -> Vec<Bucket> {
    if range.is_empty() {
        return Vec::new();
    }

    let spans = intervals
        .into_iter()
        .map(|interval| (interval.start_time, interval.end_or(as_of)))
        .filter(|(start, end)| end > start && *end > range.start && *start < range.end)
        .collect::<Vec<_>>();

    let mut buckets = Vec::new();
    let mut date = calendar.bucket_date(calendar.local_date(range.start), granularity);
    loop {
        let start = calendar.start_of(date);
        if start >= range.end {
            break;
        }
        let next = calendar.next_bucket_date(date, granularity);
        let end = calendar.start_of(next);

        let window = TimeRange::new(start.max(range.start), end.min(range.end));
        let total = spans
            .iter()
            .fold(Duration::zero(), |total, (span_start, span_end)| {
                total + window.overlap(*span_start, *span_end)
            });

        buckets.push(Bucket {
            date,
            start,
            end,
            total,
        });
        date = next;
    }

    buckets
}

/// Mean bucket total over the trailing `window_size` buckets. Buckets with no tracked time
/// count toward the denominator, so this is a per-calendar-day average rather than a
/// per-active-day one.
pub fn rolling_average(buckets: &[Bucket], window_size: usize) -> Duration {
    if window_size == 0 || buckets.is_empty() {
        return Duration::zero();
    }

    let window = &buckets[buckets.len().saturating_sub(window_size)..];
    let total = window
        .iter()
        .fold(Duration::zero(), |total, bucket| total + bucket.total);
    total / window.len() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    ThisWeek,
    ThisMonth,
    ThisYear,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::Today,
        Period::ThisWeek,
        Period::ThisMonth,
        Period::ThisYear,
    ];

    pub fn granularity(self) -> Granularity {
        match self {
            Period::Today => Granularity::Day,
            Period::ThisWeek => Granularity::Week,
            Period::ThisMonth => Granularity::Month,
            Period::ThisYear => Granularity::Year,
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Period::Today => "today",
            Period::ThisWeek => "this week",
            Period::ThisMonth => "this month",
            Period::ThisYear => "this year",
        };
        f.write_str(label)
    }
}

/// Tracked time inside the calendar bucket of `period` that contains `as_of`.
pub fn totals_for<'a, Tz: TimeZone>(
    intervals: impl IntoIterator<Item = &'a TimeInterval>,
    period: Period,
    calendar: &Calendar<Tz>,
    as_of: DateTime<Utc>,
) -> Duration {
    let granularity = period.granularity();
    let range = calendar.bucket_containing(as_of, granularity);
    bucket_totals(intervals, granularity, range, calendar, as_of)
        .iter()
        .fold(Duration::zero(), |total, bucket| total + bucket.total)
}

/// Trailing day windows offered by the statistics charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRange {
    Week,
    Month,
    ThreeMonths,
    SixMonths,
    Year,
}

impl ChartRange {
    /// First local date shown when the chart ends on `today`.
    pub fn first_day(self, today: NaiveDate) -> NaiveDate {
        let back = |days: i64| today - Duration::days(days - 1);
        match self {
            ChartRange::Week => back(7),
            ChartRange::Month => back(30),
            ChartRange::ThreeMonths => back(90),
            ChartRange::SixMonths => back(180),
            ChartRange::Year => today
                .checked_sub_months(Months::new(12))
                .expect("a year back should exist"),
        }
    }
}

impl FromStr for ChartRange {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "1w" | "week" => Ok(ChartRange::Week),
            "1m" | "month" => Ok(ChartRange::Month),
            "3m" => Ok(ChartRange::ThreeMonths),
            "6m" => Ok(ChartRange::SixMonths),
            "1y" | "1yr" | "year" => Ok(ChartRange::Year),
            other => Err(format!("unknown chart range: {other} (expected 1w|1m|3m|6m|1y)")),
        }
    }
}

/// Day buckets from the start of `chart_range` through today (inclusive).
pub fn daily_series<'a, Tz: TimeZone>(
    intervals: impl IntoIterator<Item = &'a TimeInterval>,
    chart_range: ChartRange,
    calendar: &Calendar<Tz>,
    as_of: DateTime<Utc>,
) -> Vec<Bucket> {
    let today = calendar.local_date(as_of);
    let range = calendar.day_range(chart_range.first_day(today), today);
    bucket_totals(intervals, Granularity::Day, range, calendar, as_of)
}

pub fn daily_average<'a, Tz: TimeZone>(
    intervals: impl IntoIterator<Item = &'a TimeInterval>,
    chart_range: ChartRange,
    calendar: &Calendar<Tz>,
    as_of: DateTime<Utc>,
) -> Duration {
    let series = daily_series(intervals, chart_range, calendar, as_of);
    rolling_average(&series, series.len())
}

pub fn intervals_of<'a>(tasks: &'a [Task]) -> impl Iterator<Item = &'a TimeInterval> + 'a {
    tasks.iter().flat_map(|task| task.time_intervals.iter())
}

pub fn project_total(project_id: &str, tasks: &[Task], as_of: DateTime<Utc>) -> Duration {
    tasks
        .iter()
        .filter(|task| task.project_id.as_deref() == Some(project_id))
        .fold(Duration::zero(), |total, task| {
            total + elapsed_duration(task, as_of)
        })
}

/// Tracked time per task, largest first. Tasks without time are left out.
pub fn task_share(tasks: &[Task], as_of: DateTime<Utc>) -> Vec<(String, Duration)> {
    let mut totals = tasks
        .iter()
        .map(|task| (task.id.clone(), elapsed_duration(task, as_of)))
        .filter(|(_, duration)| *duration > Duration::zero())
        .collect::<Vec<_>>();

    totals.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    totals
}

/// Share of tasks that are completed, in `0.0..=1.0`.
pub fn completion_ratio(tasks: &[Task]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let done = tasks.iter().filter(|task| task.is_completed()).count();
    done as f64 / tasks.len() as f64
}

fn local_naive_to_utc<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local_datetime) => Some(local_datetime.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => Some(first.min(second).with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

fn local_naive_to_utc_resolved<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(timestamp) = local_naive_to_utc(tz, naive) {
        return timestamp;
    }

    let mut cursor = naive + Duration::minutes(1);
    for _ in 0..MAX_GAP_MINUTES {
        if let Some(timestamp) = local_naive_to_utc(tz, cursor) {
            return timestamp;
        }
        cursor += Duration::minutes(1);
    }

    // Gap longer than any real transition: fall back to the offset in force at that instant.
    let offset = tz.offset_from_utc_datetime(&naive).fix();
    (naive - Duration::seconds(offset.local_minus_utc().into())).and_utc()
}
