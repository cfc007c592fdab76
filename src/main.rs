use std::error::Error;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;

use taskclock::aggregate::{
	Calendar, ChartRange, Granularity, Period, bucket_totals, completion_ratio, daily_average,
	intervals_of, project_total, rolling_average, task_share, totals_for,
};
use taskclock::config::{load_settings, offset_from_minutes, resolve_config_path, resolve_store_path};
use taskclock::coordinator::{IntervalEdit, RepairReport, TimerCoordinator};
use taskclock::domain::{Task, TaskPriority, format_duration};
use taskclock::error::TimerResult;
use taskclock::logging::init_logging;
use taskclock::sort::{ProjectSortKey, TaskSortKey, sort_projects, sort_tasks};
use taskclock::storage::{load_ledger, save_ledger};
use taskclock::store::{Ledger, TaskQuery, TaskStore};
use taskclock::timer::{elapsed_duration, open_interval};

#[derive(Debug, Parser)]
#[command(name = "taskclock", about = "Task time tracker with a single running timer")]
struct Cli {
	#[arg(long, global = true)]
	store: Option<PathBuf>,
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Fixed UTC offset in minutes for calendar statistics (default: local time zone).
	#[arg(long, global = true, allow_negative_numbers = true)]
	utc_offset: Option<i32>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	AddClient {
		#[arg(long)]
		name: String,
		#[arg(long)]
		email: Option<String>,
	},
	DeleteClient {
		#[arg(long)]
		client: String,
	},
	AddProject {
		#[arg(long)]
		name: String,
		#[arg(long)]
		color: Option<String>,
		#[arg(long)]
		client: Option<String>,
	},
	AddTask {
		#[arg(long)]
		title: String,
		#[arg(long)]
		project: Option<String>,
		#[arg(long)]
		priority: Option<TaskPriority>,
		/// RFC 3339 due date.
		#[arg(long)]
		due: Option<String>,
		#[arg(long)]
		description: Option<String>,
	},
	Complete {
		#[arg(long)]
		task: String,
	},
	DuplicateTask {
		#[arg(long)]
		task: String,
	},
	AddItem {
		#[arg(long)]
		task: String,
		#[arg(long)]
		title: String,
	},
	CheckItem {
		#[arg(long)]
		task: String,
		#[arg(long)]
		item: String,
		/// Mark the item as not done again.
		#[arg(long)]
		undo: bool,
	},
	DeleteItem {
		#[arg(long)]
		task: String,
		#[arg(long)]
		item: String,
	},
	Start {
		#[arg(long)]
		task: String,
		/// RFC 3339 instant; defaults to now.
		#[arg(long)]
		at: Option<String>,
	},
	Stop {
		#[arg(long)]
		task: String,
		#[arg(long)]
		at: Option<String>,
	},
	Status,
	Log {
		#[arg(long)]
		task: String,
		#[arg(long)]
		start: String,
		#[arg(long)]
		stop: String,
		#[arg(long)]
		note: Option<String>,
	},
	EditInterval {
		#[arg(long)]
		task: String,
		#[arg(long)]
		interval: String,
		#[arg(long)]
		start: Option<String>,
		#[arg(long)]
		stop: Option<String>,
		/// Replacement note; pass an empty string to clear it.
		#[arg(long)]
		note: Option<String>,
	},
	DeleteInterval {
		#[arg(long)]
		task: String,
		#[arg(long)]
		interval: String,
	},
	DeleteTask {
		#[arg(long)]
		task: String,
	},
	ListTasks {
		#[arg(long)]
		sort: Option<TaskSortKey>,
		#[arg(long)]
		show_completed: bool,
		#[arg(long)]
		project: Option<String>,
	},
	ListProjects {
		#[arg(long, default_value = "name")]
		sort: ProjectSortKey,
	},
	Totals,
	Buckets {
		#[arg(long, default_value = "day")]
		granularity: Granularity,
		/// First local date, YYYY-MM-DD (default: six days before --to).
		#[arg(long)]
		from: Option<NaiveDate>,
		/// Last local date, inclusive (default: today).
		#[arg(long)]
		to: Option<NaiveDate>,
	},
	Average {
		#[arg(long, default_value = "1w")]
		range: ChartRange,
	},
	Check {
		#[arg(long)]
		repair: bool,
	},
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();

	let config_path = resolve_config_path(cli.config);
	let settings = load_settings(config_path.as_deref())?;
	init_logging(&settings.log_filter);

	let offset = match cli.utc_offset {
		Some(minutes) => Some(offset_from_minutes(minutes)?),
		None => settings.fixed_offset()?,
	};
	let store_path = resolve_store_path(cli.store, &settings);
	debug!(
		store = %store_path.display(),
		config = ?config_path,
		"resolved paths"
	);

	let mut ledger = load_ledger(&store_path)?;
	let now = Utc::now();
	let week_start = settings.week_start;

	match cli.command.unwrap_or(Command::Status) {
		Command::Init => {
			save_ledger(&store_path, &ledger)?;
			println!("initialized store at {}", store_path.display());
		}
		Command::AddClient { name, email } => {
			let client_id = ledger.add_client(name, email);
			save_ledger(&store_path, &ledger)?;
			println!("created client {client_id}");
		}
		Command::DeleteClient { client } => {
			let removed = ledger.remove_client(&client)?;
			save_ledger(&store_path, &ledger)?;
			println!("deleted client {} and its projects", removed.id);
		}
		Command::AddProject {
			name,
			color,
			client,
		} => {
			let project_id = ledger.add_project(name, color, now);
			if let Some(client) = &client {
				ledger.assign_client(&project_id, client)?;
			}
			save_ledger(&store_path, &ledger)?;
			println!("created project {project_id}");
		}
		Command::AddTask {
			title,
			project,
			priority,
			due,
			description,
		} => {
			let mut task = Task::new(title, now);
			task.project_id = project;
			task.priority = priority;
			task.due_date = due.as_deref().map(parse_datetime).transpose()?;
			task.description = description;
			let task_id = ledger.add_task(task)?;
			save_ledger(&store_path, &ledger)?;
			println!("created task {task_id}");
		}
		Command::Complete { task } => {
			ledger.complete_task(&task, now)?;
			save_ledger(&store_path, &ledger)?;
			println!("completed {task}");
		}
		Command::DuplicateTask { task } => {
			let copy_id = ledger.duplicate_task(&task, now)?;
			save_ledger(&store_path, &ledger)?;
			println!("created task {copy_id}");
		}
		Command::AddItem { task, title } => {
			let item_id = ledger.add_item(&task, title, now)?;
			save_ledger(&store_path, &ledger)?;
			println!("added item {item_id} to {task}");
		}
		Command::CheckItem { task, item, undo } => {
			ledger.set_item_completed(&task, &item, !undo)?;
			save_ledger(&store_path, &ledger)?;
			let state = if undo { "open" } else { "done" };
			println!("marked {item} {state}");
		}
		Command::DeleteItem { task, item } => {
			let removed = ledger.remove_item(&task, &item)?;
			save_ledger(&store_path, &ledger)?;
			println!("deleted item {}", removed.id);
		}
		Command::Start { task, at } => {
			let at = parse_instant(at.as_deref(), now)?;
			let (ledger, transition) = with_timers(ledger, |timers| timers.start(&task, at))?;
			if transition.is_noop() {
				println!("{task} is already running");
				return Ok(());
			}
			save_ledger(&store_path, &ledger)?;
			for stopped in &transition.stopped {
				println!("stopped {stopped}");
			}
			println!("started {task}");
		}
		Command::Stop { task, at } => {
			let at = parse_instant(at.as_deref(), now)?;
			let (ledger, transition) = with_timers(ledger, |timers| timers.stop(&task, at))?;
			if transition.is_noop() {
				println!("{task} is not running");
				return Ok(());
			}
			save_ledger(&store_path, &ledger)?;
			println!("stopped {task}");
		}
		Command::Status => {
			print_status(&ledger, now)?;
		}
		Command::Log {
			task,
			start,
			stop,
			note,
		} => {
			let start = parse_datetime(&start)?;
			let stop = parse_datetime(&stop)?;
			let (ledger, interval) =
				with_timers(ledger, |timers| timers.log_interval(&task, start, stop, note, now))?;
			save_ledger(&store_path, &ledger)?;
			println!("recorded interval {} for {task}", interval.id);
		}
		Command::EditInterval {
			task,
			interval,
			start,
			stop,
			note,
		} => {
			let edit = IntervalEdit {
				start_time: start.as_deref().map(parse_datetime).transpose()?,
				end_time: stop.as_deref().map(parse_datetime).transpose()?,
				note,
			};
			let (ledger, edited) = with_timers(ledger, |timers| {
				timers.edit_interval(&task, &interval, edit, now)
			})?;
			save_ledger(&store_path, &ledger)?;
			println!(
				"updated interval {} | {}",
				edited.id,
				format_duration(edited.duration(now))
			);
		}
		Command::DeleteInterval { task, interval } => {
			let (ledger, removed) =
				with_timers(ledger, |timers| timers.delete_interval(&task, &interval))?;
			save_ledger(&store_path, &ledger)?;
			println!("deleted interval {}", removed.id);
		}
		Command::DeleteTask { task } => {
			let (ledger, removed) = with_timers(ledger, |timers| timers.delete_task(&task))?;
			save_ledger(&store_path, &ledger)?;
			println!(
				"deleted task {} and {} interval(s)",
				removed.id,
				removed.time_intervals.len()
			);
		}
		Command::ListTasks {
			sort,
			show_completed,
			project,
		} => {
			let tasks = ledger.query(&TaskQuery {
				project_id: project,
				..TaskQuery::all()
			});
			let rows = sort_tasks(
				&tasks,
				&ledger.projects,
				sort.unwrap_or(settings.default_sort),
				show_completed || settings.show_completed,
			);
			print_tasks(&rows, &ledger, now);
		}
		Command::ListProjects { sort } => {
			print_projects(&ledger, sort, now);
		}
		Command::Totals => match offset {
			Some(offset) => print_totals(&ledger, &Calendar::new(offset, week_start), now),
			None => print_totals(&ledger, &Calendar::new(Local, week_start), now),
		},
		Command::Buckets {
			granularity,
			from,
			to,
		} => match offset {
			Some(offset) => print_buckets(
				&ledger,
				&Calendar::new(offset, week_start),
				granularity,
				from,
				to,
				now,
			)?,
			None => print_buckets(
				&ledger,
				&Calendar::new(Local, week_start),
				granularity,
				from,
				to,
				now,
			)?,
		},
		Command::Average { range } => match offset {
			Some(offset) => print_average(&ledger, &Calendar::new(offset, week_start), range, now),
			None => print_average(&ledger, &Calendar::new(Local, week_start), range, now),
		},
		Command::Check { repair } => {
			let timers = TimerCoordinator::new(ledger);
			match timers.verify() {
				Ok(()) => println!("ledger ok"),
				Err(err) if repair => {
					println!("found: {err}");
					let report = timers.repair()?;
					timers.verify()?;
					let ledger = timers.into_inner()?;
					save_ledger(&store_path, &ledger)?;
					print_repair(&report);
				}
				Err(err) => return Err(err.into()),
			}
		}
	}

	Ok(())
}

/// Runs one coordinator operation over `ledger` and hands the ledger back for saving.
fn with_timers<T>(
	ledger: Ledger,
	operation: impl FnOnce(&TimerCoordinator<Ledger>) -> TimerResult<T>,
) -> TimerResult<(Ledger, T)> {
	let timers = TimerCoordinator::new(ledger);
	let outcome = operation(&timers);
	let ledger = timers.into_inner()?;
	Ok((ledger, outcome?))
}

fn parse_datetime(input: &str) -> Result<DateTime<Utc>, Box<dyn Error>> {
	Ok(DateTime::parse_from_rfc3339(input)?.with_timezone(&Utc))
}

fn parse_instant(input: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>, Box<dyn Error>> {
	input.map_or(Ok(now), parse_datetime)
}

fn project_name(ledger: &Ledger, task: &Task) -> String {
	task.project_id
		.as_deref()
		.and_then(|id| ledger.project(id))
		.map(|project| project.name.clone())
		.unwrap_or_else(|| "No project".to_string())
}

fn print_status(ledger: &Ledger, now: DateTime<Utc>) -> Result<(), Box<dyn Error>> {
	let Some(task) = ledger.query(&TaskQuery::active()).into_iter().next() else {
		println!("no timer running");
		return Ok(());
	};

	let session = open_interval(&task)?
		.map(|interval| interval.duration(now))
		.unwrap_or_else(Duration::zero);
	println!(
		"{} | {} | {} | session {} | total {}",
		task.id,
		project_name(ledger, &task),
		task.short_title(),
		format_duration(session),
		format_duration(elapsed_duration(&task, now))
	);
	Ok(())
}

fn print_tasks(rows: &[&Task], ledger: &Ledger, now: DateTime<Utc>) {
	if rows.is_empty() {
		println!("no tasks yet");
		return;
	}

	for task in rows {
		let marker = if task.is_active { "*" } else { " " };
		let (checked, total) = task.checklist_progress();
		println!(
			"{marker} {} | {} | {} | {} | {checked}/{total} | {} | {}",
			task.id,
			project_name(ledger, task),
			task.status.map(|status| status.label()).unwrap_or("-"),
			task.priority.map(|priority| priority.label()).unwrap_or("-"),
			format_duration(elapsed_duration(task, now)),
			task.short_title()
		);
	}
}

fn print_projects(ledger: &Ledger, sort: ProjectSortKey, now: DateTime<Utc>) {
	if ledger.projects.is_empty() {
		println!("no projects yet");
		return;
	}

	for project in sort_projects(&ledger.projects, sort) {
		println!(
			"{} | {} | {} | {} tasks | {}",
			project.id,
			project.name,
			project.status,
			ledger.tasks_in_project(&project.id).len(),
			format_duration(project_total(&project.id, &ledger.tasks, now))
		);
	}
}

fn print_totals<Tz: TimeZone>(ledger: &Ledger, calendar: &Calendar<Tz>, now: DateTime<Utc>) {
	for period in Period::ALL {
		let total = totals_for(intervals_of(&ledger.tasks), period, calendar, now);
		println!("{:>10} | {}", period.to_string(), format_duration(total));
	}
	println!(
		"{:>10} | {:.0}%",
		"completed",
		completion_ratio(&ledger.tasks) * 100.0
	);

	let shares = task_share(&ledger.tasks, now);
	if shares.is_empty() {
		return;
	}
	println!("\nby task:");
	for (task_id, duration) in &shares {
		let title = ledger
			.task(task_id)
			.map(|task| task.short_title())
			.unwrap_or_else(|| "Unknown task".to_string());
		println!("{} | {} | {}", format_duration(*duration), task_id, title);
	}
}

fn print_buckets<Tz: TimeZone>(
	ledger: &Ledger,
	calendar: &Calendar<Tz>,
	granularity: Granularity,
	from: Option<NaiveDate>,
	to: Option<NaiveDate>,
	now: DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
	let to = to.unwrap_or_else(|| calendar.local_date(now));
	let from = from.unwrap_or(to - Duration::days(6));
	if from > to {
		return Err(format!("--from {from} is after --to {to}").into());
	}

	let range = calendar.day_range(from, to);
	let buckets = bucket_totals(intervals_of(&ledger.tasks), granularity, range, calendar, now);
	for bucket in &buckets {
		println!(
			"{} | {}",
			bucket.date.format("%Y-%m-%d"),
			format_duration(bucket.total)
		);
	}
	println!(
		"average | {}",
		format_duration(rolling_average(&buckets, buckets.len()))
	);
	Ok(())
}

fn print_average<Tz: TimeZone>(
	ledger: &Ledger,
	calendar: &Calendar<Tz>,
	range: ChartRange,
	now: DateTime<Utc>,
) {
	let today = calendar.local_date(now);
	let days = (today - range.first_day(today)).num_days() + 1;
	let average = daily_average(intervals_of(&ledger.tasks), range, calendar, now);
	println!(
		"daily average over {days} days | {}",
		format_duration(average)
	);
}

fn print_repair(report: &RepairReport) {
	if report.is_clean() {
		println!("nothing to repair");
		return;
	}
	for (task_id, interval_id) in &report.closed {
		println!("closed interval {interval_id} of {task_id}");
	}
	for task_id in &report.flags_fixed {
		println!("reset active flag of {task_id}");
	}
	if let Some((task_id, interval_id)) = &report.kept {
		println!("kept interval {interval_id} of {task_id} running");
	}
}
