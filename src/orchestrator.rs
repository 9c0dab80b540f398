//! Orchestrator (C10): the top-level run loop, dispatching through every
//! other component in order (§4.10).
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cache::Cache;
use crate::config::{Config, FailureAction};
use crate::facts::{self, FactSource};
use crate::fetch::{CancelToken, FetchPolicy};
use crate::resolver::{self, ResolverConfig};
use crate::script::{RealScriptRunner, ScriptRunner};
use crate::session::{
	Event, EventLevel, EventSource, EventStatus, EventType, RetentionPolicy, Session, SessionSummary,
};
use crate::state_eval;
use crate::sysquery::{RealSysQuery, SysQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode { Auto, CheckOnly, InstallOnly, Custom }

#[derive(Debug, thiserror::Error)]
pub(crate) enum OrchestratorErr
{
	#[error("not running with administrator privileges")]
	NotElevated,
	#[error("preflight script aborted the run")]
	PreflightAborted,
	#[error("postflight script aborted the run")]
	PostflightAborted,
}

fn event(level: EventLevel, event_type: EventType, action: &str, status: EventStatus,
		message: impl Into<String>, package: Option<String>, context: Option<serde_json::Value>,
		session_id: &str) -> Event
{
	Event {
		event_id: format!("{:x}", rand::random::<u64>()),
		session_id: session_id.to_string(),
		timestamp: chrono::Utc::now(),
		level,
		event_type,
		package,
		version: None,
		action: action.to_string(),
		status,
		message: message.into(),
		duration_ms: None,
		progress: None,
		error: None,
		context,
		source: EventSource {
			file: "orchestrator.rs".to_string(),
			function: "run".to_string(),
			line: 0,
		},
	}
}

#[cfg(windows)]
fn is_elevated() -> bool
{
	use windows::Win32::Foundation::HANDLE;
	use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
	use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

	unsafe {
		let mut token = HANDLE::default();
		if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err()
		{ return false; }

		let mut elevation = TOKEN_ELEVATION::default();
		let mut ret_len = 0u32;
		let ok = GetTokenInformation(
				token, TokenElevation,
				Some(&mut elevation as *mut _ as *mut _),
				std::mem::size_of::<TOKEN_ELEVATION>() as u32,
				&mut ret_len,
		).is_ok();

		ok && elevation.TokenIsElevated != 0
	}
}

#[cfg(not(windows))]
fn is_elevated() -> bool { true }

fn run_guarded_script(path: &str, action: FailureAction, runner: &dyn ScriptRunner,
		timeout: Duration, warn: &mut dyn FnMut(String)) -> Result<(), OrchestratorErr>
{
	match runner.run_script(path, timeout)
	{
		Ok(out) if out.exit_code == 0 => Ok(()),
		Ok(out) => match action
		{
			FailureAction::Continue => { warn(format!("script '{path}' exited \
					{}: {}", out.exit_code, out.combined_output)); Ok(()) },
			FailureAction::Warn => { warn(format!("script '{path}' failed: \
					{}", out.combined_output)); Ok(()) },
			FailureAction::Abort => Err(OrchestratorErr::PreflightAborted),
		},
		Err(e) =>
		{
			warn(format!("script '{path}' could not run: {e}"));
			match action
			{
				FailureAction::Abort => Err(OrchestratorErr::PreflightAborted),
				_ => Ok(()),
			}
		},
	}
}

/// Run the full orchestration (§4.10). Returns the process exit code.
pub(crate) fn run(config_path: &Path, mode: RunMode, verbosity: u8) -> i32
{
	let mut cfg = match Config::load(config_path)
	{
		Ok(c) => c,
		Err(e) => { eprintln!("error: loading configuration: {e}"); return crate::cli::exit_code::ERROR; }
	};
	cfg.apply_cli_overrides(mode == RunMode::CheckOnly, verbosity);

	let managed_root = cfg.managed_root();
	let sessions_root = managed_root.join("Logs");
	let reports_root = managed_root.join("reports");
	let retention = RetentionPolicy::default();
	let mut retention_warnings = Vec::new();
	Session::apply_retention(&sessions_root, &retention,
			&mut |s: String| retention_warnings.push(s));

	let run_type = match mode
	{
		RunMode::Auto => "auto",
		RunMode::CheckOnly => "checkonly",
		RunMode::InstallOnly => "installonly",
		RunMode::Custom => "custom",
	};

	let session = match Session::start(&sessions_root, run_type, HashMap::new())
	{
		Ok(s) => s,
		Err(e) => { eprintln!("error: starting session: {e}"); return crate::cli::exit_code::ERROR; }
	};
	let session_id = session.id().to_string();

	for w in retention_warnings
	{ println!("warning: {w}"); }

	let cancel = CancelToken::new();
	install_cancel_handler(cancel.clone());

	let scripts = RealScriptRunner;
	let sys = RealSysQuery;
	let mut warn = |s: String| eprintln!("warning: {s}");

	if !cfg.no_preflight
	{
		if let Some(script) = cfg.repo_path.as_ref()
				.map(|p| p.join("preflight.ps1").display().to_string())
		{
			if Path::new(&script).exists()
			{
				session.log_event(&event(EventLevel::Info, EventType::Preflight,
						"preflight", EventStatus::Started, "running preflight script",
						None, None, &session_id)).ok();

				if let Err(e) = run_guarded_script(&script, cfg.preflight_failure_action,
						&scripts, Duration::from_secs(300), &mut warn)
				{
					session.log_event(&event(EventLevel::Error, EventType::Preflight,
							"preflight", EventStatus::Failed, e.to_string(), None, None,
							&session_id)).ok();
					finalize(session, &reports_root, &sessions_root, "interrupted",
							SessionSummary { failures: 1, ..Default::default() });
					return crate::cli::exit_code::ERROR;
				}
			}
		}
	}

	if !is_elevated()
	{
		eprintln!("error: {}", OrchestratorErr::NotElevated);
		finalize(session, &reports_root, &sessions_root, "failed",
				SessionSummary { failures: 1, ..Default::default() });
		return crate::cli::exit_code::ERROR;
	}

	let cache = Cache::new(&cfg.cache_path);
	if let Err(e) = cache.ensure_dirs()
	{
		eprintln!("error: preparing cache directories: {e}");
		finalize(session, &reports_root, &sessions_root, "failed",
				SessionSummary { failures: 1, ..Default::default() });
		return crate::cli::exit_code::ERROR;
	}
	let (scanned, removed) = cache.scan_and_clean();
	println!("cache: scanned {scanned} files, removed {removed}");

	let facts_source = facts::HostFacts;
	let facts = facts::gather(&facts_source);

	let agent = ureq::AgentBuilder::new().build();
	let policy = FetchPolicy { force_basic_auth: cfg.force_basic_auth, ..Default::default() };

	let resolver_cfg = ResolverConfig {
		repo_base: cfg.software_repo_url.clone(),
		client_identifier: cfg.client_identifier.clone(),
		default_catalog: cfg.default_catalog.clone(),
		self_service_manifest: cfg.local_only_manifest.clone().map(std::path::PathBuf::from),
		self_service_opt_out: false,
	};

	let work_items = resolver::resolve(&agent, &cache, &resolver_cfg, &policy, &cancel,
			&facts, &mut warn);

	if mode == RunMode::Auto && sys.idle_seconds() < 300
	{
		println!("skipping run: user is not idle");
		finalize(session, &reports_root, &sessions_root, "skipped", SessionSummary::default());
		return crate::cli::exit_code::SUCCESS;
	}

	let timeout = Duration::from_secs(cfg.installer_timeout_minutes as u64 * 60);
	let needed: Vec<_> = work_items.into_iter()
			.filter(|item| state_eval::needs_action(item, &facts, &sys, &scripts, timeout, &mut warn))
			.collect();

	let mut summary = SessionSummary::default();
	summary.total_actions = needed.len() as u32;

	if !cfg.check_only
	{
		for item in &needed
		{
			let start = Instant::now();
			session.log_event(&event(EventLevel::Info, EventType::Download, "fetch",
					EventStatus::Started, format!("fetching {}", item.name),
					Some(item.name.clone()), None, &session_id)).ok();

			let fetch_result = if mode == RunMode::InstallOnly
			{
				cached_payload_only(&cache, &cfg, item)
			}
			else
			{
				fetch_payload(&agent, &cache, &cfg, &policy, &cancel, item)
			};

			let local_file = match fetch_result
			{
				Ok(path) => path,
				Err(e) =>
				{
					summary.failures += 1;
					session.log_event(&event(EventLevel::Error, EventType::Download, "fetch",
							EventStatus::Failed, e, Some(item.name.clone()), None, &session_id)).ok();
					continue;
				},
			};

			let outcome = crate::installer::install(item, &local_file, item.action,
					&sys, &scripts, timeout, &mut warn);

			use crate::installer::InstallState::*;
			match outcome.state
			{
				Installed =>
				{
					summary.successes += 1;
					let _ = std::fs::remove_file(&local_file);
				},
				_ => summary.failures += 1,
			}

			match item.action
			{
				resolver::Action::Install | resolver::Action::Optional => summary.installs += 1,
				resolver::Action::Update => summary.updates += 1,
				resolver::Action::Uninstall => summary.removals += 1,
			}
			summary.packages_handled.push(item.name.clone());

			let (event_type, context) = if outcome.state == Blocked
			{
				(EventType::Blocking, Some(serde_json::json!({
						"blocking_apps": outcome.blocked_by })))
			}
			else
			{
				let event_type = match item.action
				{
					resolver::Action::Uninstall => EventType::Remove,
					resolver::Action::Update => EventType::Update,
					_ => EventType::Install,
				};
				(event_type, None)
			};

			session.log_event(&event(
					if outcome.state == Installed { EventLevel::Info } else { EventLevel::Error },
					event_type, "install", EventStatus::Completed,
					format!("{:?}: {}", outcome.state, outcome.output),
					Some(item.name.clone()), context, &session_id)).ok();

			summary.duration_ms += start.elapsed().as_millis() as u64;

			if cancel.is_cancelled() { break; }
		}
	}

	if !cfg.no_preflight
	{
		if let Some(script) = cfg.repo_path.as_ref()
				.map(|p| p.join("postflight.ps1").display().to_string())
		{
			if Path::new(&script).exists()
			{
				let _ = run_guarded_script(&script, cfg.postflight_failure_action,
						&scripts, Duration::from_secs(300), &mut warn);
			}
		}
	}

	let status = if cancel.is_cancelled() { "interrupted" } else { "completed" };
	finalize(session, &reports_root, &sessions_root, status, summary);

	// Per-item failures (blocked, timed out, installer error, ...) are
	// recorded in the session report but never change the exit code (§7) —
	// only a config load failure, a non-elevated process, or an aborting
	// preflight script do that, and those all return early above.
	crate::cli::exit_code::SUCCESS
}

fn fetch_payload(agent: &ureq::Agent, cache: &Cache, cfg: &Config, policy: &FetchPolicy,
		cancel: &CancelToken, item: &resolver::WorkItem) -> Result<std::path::PathBuf, String>
{
	let url = format!("{}/{}", cfg.software_repo_url, item.installer_location);
	crate::fetch::fetch(agent, &url, crate::fetch::FetchKind::Payload, &cache.payload_root,
			&cfg.software_repo_url, policy, cancel)
			.map_err(|e| e.to_string())
}

/// `--installonly` (§6.4): install only what's already in the payload
/// cache, never reach the network.
fn cached_payload_only(cache: &Cache, cfg: &Config, item: &resolver::WorkItem)
		-> Result<std::path::PathBuf, String>
{
	let url = format!("{}/{}", cfg.software_repo_url, item.installer_location);
	let path = crate::fetch::local_path(&url, crate::fetch::FetchKind::Payload,
			&cache.payload_root, &cfg.software_repo_url)
			.map_err(|e| e.to_string())?;

	match std::fs::metadata(&path)
	{
		Ok(meta) if meta.len() > 0 => Ok(path),
		_ => Err(format!("'{}' is not cached locally (install-only mode)", item.name)),
	}
}

/// Close the session with its final summary and export the reporting
/// tables (§4.10 step 11, §4.9 Export) over whatever sessions survive
/// retention.
fn finalize(session: Session, reports_root: &Path, sessions_root: &Path, status: &str,
		summary: SessionSummary)
{
	let _ = session.end(status, summary);
	let _ = crate::session::Session::write_reports(reports_root, sessions_root);
}

/// Install a SIGINT/SIGTERM-equivalent (Ctrl-C, console close) handler
/// that cancels `token` (§5). Registration failure just means a second
/// Ctrl-C behaves like the default terminate-immediately, so it's logged
/// and otherwise ignored rather than aborting the run.
fn install_cancel_handler(token: CancelToken)
{
	if let Err(e) = ctrlc::set_handler(move || token.cancel())
	{
		eprintln!("warning: could not install shutdown handler: {e}");
	}
}


#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn elevated_check_has_a_value()
	{
		// Can't assert a specific value without a live privileged
		// process, just that the call doesn't panic.
		let _ = is_elevated();
	}
}
