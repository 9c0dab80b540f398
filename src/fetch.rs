//! Fetcher (C1): atomic, retrying, integrity-checked download of
//! manifests, catalogs, and installer payloads from the software repo.
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use url::Url;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchKind { Manifest, Catalog, Payload }

impl FetchKind
{
	fn marker(self) -> &'static str
	{
		match self
		{
			Self::Manifest => "/manifests/",
			Self::Catalog => "/catalogs/",
			Self::Payload => "/pkgs/",
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchErr
{
	#[error("not found: {0}")]
	NotFound(String),
	#[error("forbidden: {0}")]
	Forbidden(String),
	#[error("server error {0}: {1}")]
	ServerError(u16, String),
	#[error("incomplete download: expected {expected} bytes, got {got}")]
	Incomplete { expected: u64, got: u64 },
	#[error("empty download")]
	Empty,
	#[error("corrupt download: {0}")]
	Corrupt(String),
	#[error("network error: {0}")]
	Network(String),
	#[error("cancelled")]
	Cancelled,
}

/// Retry/backoff/timeout policy (§4.1), overridable from config for
/// tests; defaults match the spec.
#[derive(Debug, Clone)]
pub(crate) struct FetchPolicy
{
	pub(crate) max_retries: u32,
	pub(crate) initial_interval: Duration,
	pub(crate) multiplier: u32,
	pub(crate) force_basic_auth: bool,
}

impl Default for FetchPolicy
{
	fn default() -> Self
	{
		Self {
			max_retries: 3,
			initial_interval: Duration::from_secs(1),
			multiplier: 2,
			force_basic_auth: false,
		}
	}
}

/// A cooperative cancellation flag shared between the orchestrator's
/// signal handler and the fetcher/installer (§5).
#[derive(Clone, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken
{
	pub(crate) fn new() -> Self { Self(Arc::new(AtomicBool::new(false))) }
	pub(crate) fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
	pub(crate) fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

fn is_retryable(err: &FetchErr) -> bool
{
	!matches!(err, FetchErr::NotFound(_) | FetchErr::Cancelled)
}

/// Work out the on-disk subpath under `dest_root` for a given URL,
/// deriving it from the segment after the kind's marker, falling back
/// to the URL's basename (§4.1).
fn subpath_for(url: &Url, kind: FetchKind) -> PathBuf
{
	let path = url.path();
	if let Some(idx) = path.find(kind.marker())
	{
		let rest = &path[idx + kind.marker().len()..];
		return PathBuf::from(rest.trim_start_matches('/'));
	}

	PathBuf::from(path.rsplit('/').next().unwrap_or("download"))
}

/// If `kind == Payload`, the URL is under the repo base, and none of
/// the three markers are present, insert `/pkgs` after the repo base
/// (§4.1 URL normalization).
fn normalize_payload_url(url: &str, repo_base: &str, kind: FetchKind) -> String
{
	if kind != FetchKind::Payload { return url.to_string(); }
	if url.contains("/manifests/") || url.contains("/catalogs/") || url.contains("/pkgs/")
	{ return url.to_string(); }
	if let Some(rest) = url.strip_prefix(repo_base)
	{
		return format!("{repo_base}/pkgs{rest}");
	}
	url.to_string()
}

fn timeout_for(content_length: Option<u64>) -> Duration
{
	let base = Duration::from_secs(600);
	match content_length
	{
		Some(len) if len >= 100 * 1024 * 1024 =>
		{
			let extra_50mib_chunks = len / (50 * 1024 * 1024);
			base + Duration::from_secs(60) + Duration::from_secs(60 * extra_50mib_chunks)
		},
		_ => base,
	}
}

/// One non-retried attempt at the whole fetch: open the connection,
/// stream to a `.downloading` temp file, validate, rename into place.
fn attempt(agent: &ureq::Agent, url: &Url, dest: &Path, policy: &FetchPolicy,
		cancel: &CancelToken) -> Result<(), FetchErr>
{
	use std::time::Instant;

	if cancel.is_cancelled() { return Err(FetchErr::Cancelled); }

	let mut req = agent.request_url("GET", url);
	if policy.force_basic_auth && !url.username().is_empty()
	{
		use base64::Engine;
		let creds = format!("{}:{}", url.username(), url.password().unwrap_or(""));
		let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
		req = req.set("Authorization", &format!("Basic {encoded}"));
	}

	let resp = req.call().map_err(|e| classify_ureq_err(e))?;

	let content_length: Option<u64> = resp.header("Content-Length")
			.and_then(|s| s.parse().ok());

	let tmp = dest.with_file_name(format!(
			"{}.downloading", dest.file_name()
					.map(|n| n.to_string_lossy().into_owned())
					.unwrap_or_else(|| "download".to_string())));

	if let Some(parent) = dest.parent()
	{ std::fs::create_dir_all(parent).map_err(|e| FetchErr::Network(e.to_string()))?; }

	let mut file = std::fs::File::create(&tmp)
			.map_err(|e| FetchErr::Network(e.to_string()))?;

	// Content-Length isn't known until the response headers arrive, so
	// the scaled timeout (§4.1) is enforced as a deadline over the body
	// read loop rather than a connect-time request option.
	let deadline = Instant::now() + timeout_for(content_length);

	let mut reader = resp.into_reader();
	let mut buf = [0u8; 64 * 1024];
	let mut written: u64 = 0;
	loop
	{
		if cancel.is_cancelled()
		{
			let _ = std::fs::remove_file(&tmp);
			return Err(FetchErr::Cancelled);
		}
		if Instant::now() > deadline
		{
			drop(file);
			let _ = std::fs::remove_file(&tmp);
			return Err(FetchErr::Network("download exceeded scaled timeout".to_string()));
		}
		let n = reader.read(&mut buf).map_err(|e| FetchErr::Network(e.to_string()))?;
		if n == 0 { break; }
		file.write_all(&buf[..n]).map_err(|e| FetchErr::Network(e.to_string()))?;
		written += n as u64;
	}
	drop(file);

	if let Some(expected) = content_length
	{
		if expected != written
		{
			let _ = std::fs::remove_file(&tmp);
			return Err(FetchErr::Incomplete { expected, got: written });
		}
	}

	if written == 0
	{
		let _ = std::fs::remove_file(&tmp);
		return Err(FetchErr::Empty);
	}

	std::fs::rename(&tmp, dest).map_err(|e| FetchErr::Network(e.to_string()))?;

	Ok(())
}

fn classify_ureq_err(e: ureq::Error) -> FetchErr
{
	match e
	{
		ureq::Error::Status(404, resp) => FetchErr::NotFound(resp.status_text().to_string()),
		ureq::Error::Status(403, resp) => FetchErr::Forbidden(resp.status_text().to_string()),
		ureq::Error::Status(code, resp) if code >= 500 =>
				FetchErr::ServerError(code, resp.status_text().to_string()),
		ureq::Error::Status(code, resp) =>
				FetchErr::ServerError(code, resp.status_text().to_string()),
		ureq::Error::Transport(t) => FetchErr::Network(t.to_string()),
	}
}

/// Compute the local cache destination for `url_str` without touching
/// the network — used by `--installonly` (§6.4) to check whether a
/// payload is already cached before deciding whether to fetch it.
pub(crate) fn local_path(url_str: &str, kind: FetchKind, dest_root: &Path, repo_base: &str)
		-> Result<PathBuf, FetchErr>
{
	let normalized = normalize_payload_url(url_str, repo_base, kind);
	let url = Url::parse(&normalized)
			.map_err(|e| FetchErr::Network(format!("bad url '{normalized}': {e}")))?;
	Ok(dest_root.join(subpath_for(&url, kind)))
}

/// `fetch(url, kind) -> result` (§4.1). `dest_root` is the local
/// manifests/catalogs/payload root for `kind`; `repo_base` is the
/// configured `SoftwareRepoURL` used for payload URL normalization.
pub(crate) fn fetch(agent: &ureq::Agent, url_str: &str, kind: FetchKind,
		dest_root: &Path, repo_base: &str, policy: &FetchPolicy, cancel: &CancelToken)
		-> Result<PathBuf, FetchErr>
{
	let normalized = normalize_payload_url(url_str, repo_base, kind);
	let url = Url::parse(&normalized)
			.map_err(|e| FetchErr::Network(format!("bad url '{normalized}': {e}")))?;
	let dest = dest_root.join(subpath_for(&url, kind));

	if let Ok(meta) = std::fs::metadata(&dest)
	{
		if meta.len() > 0 { return Ok(dest); }
	}

	let mut wait = policy.initial_interval;
	let mut last_err = FetchErr::Empty;

	for attempt_no in 0..=policy.max_retries
	{
		match attempt(agent, &url, &dest, policy, cancel)
		{
			Ok(()) => return Ok(dest),
			Err(e) =>
			{
				let retryable = is_retryable(&e);
				last_err = e;
				if !retryable || attempt_no == policy.max_retries { break; }
				std::thread::sleep(wait);
				wait *= policy.multiplier;
			},
		}
	}

	Err(last_err)
}
