//! Session logger (C9): per-run session directory, append-only event
//! log, retention, and report export.
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventLevel { Error, Warn, Info, Debug }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventType
{
	Install, Remove, Update, Download, Cache, Catalog, Manifest,
	Dependency, Blocking, Preflight, Postflight,
	#[strum(serialize = "status_check")]
	#[serde(rename = "status_check")]
	StatusCheck,
	Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventStatus { Started, Progress, Completed, Failed }

#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct EventSource
{
	pub(crate) file: String,
	pub(crate) function: String,
	pub(crate) line: u32,
}

#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Event
{
	pub(crate) event_id: String,
	pub(crate) session_id: String,
	pub(crate) timestamp: DateTime<Utc>,
	pub(crate) level: EventLevel,
	pub(crate) event_type: EventType,
	pub(crate) package: Option<String>,
	pub(crate) version: Option<String>,
	pub(crate) action: String,
	pub(crate) status: EventStatus,
	pub(crate) message: String,
	pub(crate) duration_ms: Option<u64>,
	pub(crate) progress: Option<f32>,
	pub(crate) error: Option<String>,
	pub(crate) context: Option<serde_json::Value>,
	pub(crate) source: EventSource,
}

#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct SessionSummary
{
	pub(crate) total_actions: u32,
	pub(crate) installs: u32,
	pub(crate) updates: u32,
	pub(crate) removals: u32,
	pub(crate) successes: u32,
	pub(crate) failures: u32,
	pub(crate) duration_ms: u64,
	pub(crate) packages_handled: Vec<String>,
}

#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct SessionRecord
{
	pub(crate) session_id: String,
	pub(crate) run_type: String,
	pub(crate) start: DateTime<Utc>,
	pub(crate) end: Option<DateTime<Utc>>,
	pub(crate) status: String,
	pub(crate) summary: SessionSummary,
	pub(crate) environment: HashMap<String, String>,
}

pub(crate) struct RetentionPolicy
{
	pub(crate) hourly_retention_hours: i64,
	pub(crate) daily_retention_days: i64,
}

impl Default for RetentionPolicy
{
	fn default() -> Self
	{ Self { hourly_retention_hours: 24, daily_retention_days: 30 } }
}

pub(crate) struct Session
{
	root: PathBuf,
	dir: PathBuf,
	record: SessionRecord,
}

/// Parse a `YYYYMMDD-HHMMSS` session directory name into a local
/// timestamp, rejecting anything that doesn't match the strict format
/// (§4.9 retention's filter).
fn parse_session_dirname(name: &str) -> Option<DateTime<Local>>
{
	let (date, time) = name.split_once('-')?;
	if date.len() != 8 || time.len() != 6 { return None; }
	if !date.bytes().all(|b| b.is_ascii_digit()) { return None; }
	if !time.bytes().all(|b| b.is_ascii_digit()) { return None; }

	let naive = chrono::NaiveDateTime::parse_from_str(name, "%Y%m%d-%H%M%S").ok()?;
	Some(naive.and_local_timezone(Local).single()?)
}

impl Session
{
	/// `start_session(run_type, metadata) -> session_id` (§4.9).
	pub(crate) fn start(sessions_root: &Path, run_type: &str,
			environment: HashMap<String, String>) -> std::io::Result<Self>
	{
		let now = Local::now();
		let session_id = now.format("%Y%m%d-%H%M%S").to_string();
		let dir = sessions_root.join(&session_id);
		std::fs::create_dir_all(&dir)?;

		let record = SessionRecord {
			session_id: session_id.clone(),
			run_type: run_type.to_string(),
			start: now.with_timezone(&Utc),
			end: None,
			status: "running".to_string(),
			summary: SessionSummary::default(),
			environment,
		};

		let session = Self { root: sessions_root.to_path_buf(), dir, record };
		session.write_session_json()?;
		Ok(session)
	}

	pub(crate) fn id(&self) -> &str { &self.record.session_id }

	fn write_session_json(&self) -> std::io::Result<()>
	{
		let path = self.dir.join("session.json");
		let bytes = serde_json::to_vec_pretty(&self.record)?;
		std::fs::write(path, bytes)
	}

	/// `log_event(event)` (§4.9): pretty-printed JSON object, appended
	/// and fsync'd immediately so a crash never loses a partially
	/// written event.
	pub(crate) fn log_event(&self, event: &Event) -> std::io::Result<()>
	{
		let path = self.dir.join("events.jsonl");
		let mut file = OpenOptions::new().create(true).append(true).open(path)?;
		let bytes = serde_json::to_vec_pretty(event)?;
		file.write_all(&bytes)?;
		file.write_all(b"\n")?;
		file.sync_all()
	}

	/// `end_session(status, summary)` (§4.9).
	pub(crate) fn end(mut self, status: &str, summary: SessionSummary) -> std::io::Result<()>
	{
		self.record.status = status.to_string();
		self.record.summary = summary;
		self.record.end = Some(Utc::now());
		self.write_session_json()
	}

	/// Retention pass (§4.9): run at the start of each session, over the
	/// directories that already exist (not including the one just
	/// created for this run).
	pub(crate) fn apply_retention(sessions_root: &Path, policy: &RetentionPolicy,
			warn: &mut dyn FnMut(String))
	{
		let Ok(entries) = std::fs::read_dir(sessions_root) else { return; };

		let mut dated: Vec<(String, DateTime<Local>)> = entries.flatten()
				.filter_map(|e| {
					let name = e.file_name().to_string_lossy().into_owned();
					parse_session_dirname(&name).map(|ts| (name, ts))
				})
				.collect();
		dated.sort_by_key(|(_, ts)| *ts);

		let now = Local::now();
		let mut earliest_per_day: HashMap<NaiveDate, &str> = HashMap::new();
		for (name, ts) in &dated
		{
			earliest_per_day.entry(ts.date_naive()).or_insert(name.as_str());
		}

		for (name, ts) in &dated
		{
			let age = now.signed_duration_since(*ts);
			let is_earliest_of_day = earliest_per_day.get(&ts.date_naive())
					.map(|n| *n == name.as_str()).unwrap_or(false);

			let past_hourly = age.num_hours() > policy.hourly_retention_hours
					&& !is_earliest_of_day;
			let past_daily = age.num_hours() > policy.daily_retention_days * 24;

			if past_hourly || past_daily
			{
				let path = sessions_root.join(name);
				if let Err(e) = std::fs::remove_dir_all(&path)
				{ warn(format!("removing expired session '{name}': {e}")); }
			}
		}
	}

	/// Export the three reporting tables (§4.9) by folding over whatever
	/// sessions remain under `sessions_root` after retention.
	pub(crate) fn export_report(sessions_root: &Path)
			-> (Vec<SessionRecord>, Vec<Event>, HashMap<String, PackageAggregate>)
	{
		let mut sessions = Vec::new();
		let mut events = Vec::new();
		let mut packages: HashMap<String, PackageAggregate> = HashMap::new();

		let Ok(entries) = std::fs::read_dir(sessions_root) else {
			return (sessions, events, packages);
		};

		for entry in entries.flatten()
		{
			let dir = entry.path();
			if !dir.is_dir() { continue; }

			if let Ok(bytes) = std::fs::read(dir.join("session.json"))
			{
				if let Ok(record) = serde_json::from_slice::<SessionRecord>(&bytes)
				{ sessions.push(record); }
			}

			if let Ok(text) = std::fs::read_to_string(dir.join("events.jsonl"))
			{
				for doc in split_json_objects(&text)
				{
					if let Ok(event) = serde_json::from_str::<Event>(&doc)
					{
						if let Some(pkg) = &event.package
						{
							let agg = packages.entry(pkg.clone()).or_default();
							agg.apply(&event);
						}
						events.push(event);
					}
				}
			}
		}

		(sessions, events, packages)
	}

	/// Export the three reporting tables and write them to
	/// `reports_root` as `sessions.json`, `events.json`, `packages.json`
	/// (§4.9 Export, §6.6 persisted state).
	pub(crate) fn write_reports(reports_root: &Path, sessions_root: &Path) -> std::io::Result<()>
	{
		let (sessions, events, packages) = Self::export_report(sessions_root);

		std::fs::create_dir_all(reports_root)?;
		std::fs::write(reports_root.join("sessions.json"),
				serde_json::to_vec_pretty(&sessions)?)?;
		std::fs::write(reports_root.join("events.json"),
				serde_json::to_vec_pretty(&events)?)?;
		std::fs::write(reports_root.join("packages.json"),
				serde_json::to_vec_pretty(&packages)?)?;
		Ok(())
	}
}

/// `events.jsonl` is pretty-printed objects separated by newlines, not
/// one-object-per-line — split back into whole JSON documents by
/// brace-depth tracking rather than assuming single-line records.
fn split_json_objects(text: &str) -> Vec<String>
{
	let mut out = Vec::new();
	let mut depth = 0i32;
	let mut cur = String::new();
	let mut in_string = false;
	let mut escaped = false;

	for c in text.chars()
	{
		if !cur.is_empty() || c == '{' { cur.push(c); }

		if in_string
		{
			if escaped { escaped = false; }
			else if c == '\\' { escaped = true; }
			else if c == '"' { in_string = false; }
			continue;
		}

		match c
		{
			'"' => in_string = true,
			'{' => depth += 1,
			'}' =>
			{
				depth -= 1;
				if depth == 0 && !cur.is_empty()
				{ out.push(std::mem::take(&mut cur)); }
			},
			_ => {},
		}
	}

	out
}

#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct PackageAggregate
{
	pub(crate) installs: u32,
	pub(crate) updates: u32,
	pub(crate) removals: u32,
	pub(crate) last_status: Option<String>,
}

impl PackageAggregate
{
	fn apply(&mut self, event: &Event)
	{
		match event.event_type
		{
			EventType::Install => self.installs += 1,
			EventType::Update => self.updates += 1,
			EventType::Remove => self.removals += 1,
			_ => {},
		}
		self.last_status = Some(event.status.to_string());
	}
}


#[cfg(test)]
mod tests
{
	use super::*;

	fn sample_event(pkg: &str, status: EventStatus, kind: EventType) -> Event
	{
		Event {
			event_id: "e1".to_string(),
			session_id: "s1".to_string(),
			timestamp: Utc::now(),
			level: EventLevel::Info,
			event_type: kind,
			package: Some(pkg.to_string()),
			version: None,
			action: "install".to_string(),
			status,
			message: "m".to_string(),
			duration_ms: None,
			progress: None,
			error: None,
			context: None,
			source: EventSource { file: "x.rs".to_string(), function: "f".to_string(), line: 1 },
		}
	}

	#[test]
	fn start_and_end_session_writes_json()
	{
		let dir = tempfile::tempdir().unwrap();
		let env = HashMap::new();
		let session = Session::start(dir.path(), "auto", env).unwrap();
		let id = session.id().to_string();

		let event = sample_event("Firefox", EventStatus::Completed, EventType::Install);
		session.log_event(&event).unwrap();

		session.end("completed", SessionSummary::default()).unwrap();

		let record_bytes = std::fs::read(dir.path().join(&id).join("session.json")).unwrap();
		let record: SessionRecord = serde_json::from_slice(&record_bytes).unwrap();
		assert_eq!(record.status, "completed");

		let events_text = std::fs::read_to_string(dir.path().join(&id).join("events.jsonl")).unwrap();
		assert!(events_text.contains("Firefox"));
	}

	#[test]
	fn parse_session_dirname_rejects_garbage()
	{
		assert!(parse_session_dirname("20260101-120000").is_some());
		assert!(parse_session_dirname("not-a-session").is_none());
		assert!(parse_session_dirname("2026010-120000").is_none());
	}

	#[test]
	fn split_json_objects_handles_multiple_pretty_records()
	{
		let text = "{\n  \"a\": 1\n}\n{\n  \"a\": 2\n}\n";
		let docs = split_json_objects(text);
		assert_eq!(docs.len(), 2);
	}

	#[test]
	fn package_aggregate_counts_by_event_type()
	{
		let mut agg = PackageAggregate::default();
		agg.apply(&sample_event("Firefox", EventStatus::Completed, EventType::Install));
		agg.apply(&sample_event("Firefox", EventStatus::Completed, EventType::Update));
		assert_eq!(agg.installs, 1);
		assert_eq!(agg.updates, 1);
		assert_eq!(agg.last_status, Some("completed".to_string()));
	}

	#[test]
	fn export_report_folds_sessions_and_events()
	{
		let dir = tempfile::tempdir().unwrap();
		let session = Session::start(dir.path(), "auto", HashMap::new()).unwrap();
		session.log_event(&sample_event("Firefox", EventStatus::Completed, EventType::Install))
				.unwrap();
		session.end("completed", SessionSummary::default()).unwrap();

		let (sessions, events, packages) = Session::export_report(dir.path());
		assert_eq!(sessions.len(), 1);
		assert_eq!(events.len(), 1);
		assert_eq!(packages["Firefox"].installs, 1);
	}

	#[test]
	fn write_reports_creates_three_json_files()
	{
		let sessions_dir = tempfile::tempdir().unwrap();
		let reports_dir = tempfile::tempdir().unwrap();

		let session = Session::start(sessions_dir.path(), "auto", HashMap::new()).unwrap();
		session.log_event(&sample_event("Firefox", EventStatus::Completed, EventType::Install))
				.unwrap();
		session.end("completed", SessionSummary::default()).unwrap();

		Session::write_reports(reports_dir.path(), sessions_dir.path()).unwrap();

		assert!(reports_dir.path().join("sessions.json").exists());
		assert!(reports_dir.path().join("events.json").exists());
		assert!(reports_dir.path().join("packages.json").exists());
	}
}
