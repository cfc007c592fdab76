use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Weekday};
use serde::Deserialize;
use thiserror::Error;

use crate::sort::TaskSortKey;

const APP_DIR: &str = "taskclock";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "taskclock.ledger";
const MAX_OFFSET_MINUTES: i32 = 18 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config: {0}")]
	Toml(#[from] toml::de::Error),
	#[error("invalid value for {field}: {reason}")]
	InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub store_path: Option<PathBuf>,
	pub week_start: Weekday,
	pub utc_offset_minutes: Option<i32>,
	pub default_sort: TaskSortKey,
	pub show_completed: bool,
	pub log_filter: String,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			store_path: None,
			week_start: Weekday::Mon,
			utc_offset_minutes: None,
			default_sort: TaskSortKey::default(),
			show_completed: false,
			log_filter: "warn".to_string(),
		}
	}
}

impl Settings {
	pub fn parse(raw: &str) -> Result<Self, ConfigError> {
		let settings: Settings = toml::from_str(raw)?;
		settings.fixed_offset()?;
		Ok(settings)
	}

	/// The pinned calendar offset, or `None` to follow the local time zone.
	pub fn fixed_offset(&self) -> Result<Option<FixedOffset>, ConfigError> {
		self.utc_offset_minutes.map(offset_from_minutes).transpose()
	}
}

pub fn offset_from_minutes(minutes: i32) -> Result<FixedOffset, ConfigError> {
	let invalid = || ConfigError::InvalidValue {
		field: "utc_offset_minutes",
		reason: format!("{minutes} is outside ±{MAX_OFFSET_MINUTES} minutes"),
	};
	if minutes.abs() > MAX_OFFSET_MINUTES {
		return Err(invalid());
	}
	FixedOffset::east_opt(minutes * 60).ok_or_else(invalid)
}

/// Reads settings from `path`. A missing file, or no path at all, yields the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
	let Some(path) = path else {
		return Ok(Settings::default());
	};
	match fs::read_to_string(path) {
		Ok(raw) => Settings::parse(&raw),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(Settings::default()),
		Err(err) => Err(ConfigError::Io(err)),
	}
}

pub fn resolve_config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
	if let Some(path) = cli_path {
		return Some(absolutize(path));
	}

	if let Some(path) = non_empty_env("TASKCLOCK_CONFIG") {
		return Some(absolutize(path));
	}

	if let Some(path) = non_empty_env("XDG_CONFIG_HOME") {
		return Some(path.join(APP_DIR).join(CONFIG_FILE));
	}

	non_empty_env("HOME").map(|home| home.join(".config").join(APP_DIR).join(CONFIG_FILE))
}

pub fn resolve_store_path(cli_path: Option<PathBuf>, settings: &Settings) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = non_empty_env("TASKCLOCK_STORE") {
		return absolutize(path);
	}

	if let Some(path) = &settings.store_path {
		return absolutize(path.clone());
	}

	state_dir().join(STORE_FILE)
}

pub fn state_dir() -> PathBuf {
	if let Some(path) = non_empty_env("TASKCLOCK_STATE_DIR") {
		return path;
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = non_empty_env("LOCALAPPDATA") {
			return path.join(APP_DIR);
		}
	}

	if let Some(path) = non_empty_env("XDG_STATE_HOME") {
		return path.join(APP_DIR);
	}

	if let Some(path) = non_empty_env("HOME") {
		return path.join(".local").join("state").join(APP_DIR);
	}

	PathBuf::from(".taskclock")
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
	env::var_os(key)
		.filter(|value| !value.is_empty())
		.map(PathBuf::from)
}

fn absolutize(path: PathBuf) -> PathBuf {
	let path = if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	};

	if path.exists() {
		fs::canonicalize(&path).unwrap_or(path)
	} else {
		path
	}
}
