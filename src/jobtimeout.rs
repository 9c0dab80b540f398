//! Process-tree supervision: race a spawned installer's exit against a
//! timeout, the first to complete cancels the other (§5). On Windows the
//! child is placed in a Job Object so a timeout kill takes its whole
//! process tree, not just the immediate child.
use std::io;
use std::process::{Child, Command};
use std::sync::mpsc;
use std::time::Duration;

use crate::script::ScriptOutput;

#[cfg(windows)]
struct Job(windows::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl Job
{
	fn new() -> io::Result<Self>
	{
		use windows::Win32::System::JobObjects::{
			CreateJobObjectW, SetInformationJobObject, JobObjectExtendedLimitInformation,
			JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
		};

		unsafe {
			let handle = CreateJobObjectW(None, None)
					.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

			let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
			info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

			SetInformationJobObject(
					handle,
					JobObjectExtendedLimitInformation,
					&info as *const _ as *const _,
					std::mem::size_of_val(&info) as u32,
			).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

			Ok(Self(handle))
		}
	}

	fn assign(&self, child: &Child) -> io::Result<()>
	{
		use windows::Win32::Foundation::HANDLE;
		use windows::Win32::System::JobObjects::AssignProcessToJobObject;
		use windows::Win32::System::Threading::OpenProcess;
		use windows::Win32::System::Threading::PROCESS_SET_QUOTA;

		unsafe {
			let handle = OpenProcess(PROCESS_SET_QUOTA, false, child.id())
					.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
			AssignProcessToJobObject(self.0, handle)
					.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
			let _: HANDLE = handle;
		}
		Ok(())
	}
}

#[cfg(windows)]
impl Drop for Job
{
	fn drop(&mut self)
	{
		// Closing the handle with KILL_ON_JOB_CLOSE set terminates any
		// surviving member processes — our cleanup-on-timeout path.
		unsafe { let _ = windows::Win32::Foundation::CloseHandle(self.0); }
	}
}

#[derive(Debug)]
pub(crate) enum RunErr
{
	Timeout,
	Io(String),
}

impl std::fmt::Display for RunErr
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Self::Timeout => write!(f, "timed out"),
			Self::Io(e) => write!(f, "{e}"),
		}
	}
}

/// Spawn `cmd`, race its exit against `timeout`; on timeout, kill the
/// whole process tree (via Job Object on Windows) and return `Timeout`.
pub(crate) fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ScriptOutput, RunErr>
{
	use std::io::Read;

	cmd.stdout(std::process::Stdio::piped());
	cmd.stderr(std::process::Stdio::piped());

	let mut child = cmd.spawn().map_err(|e| RunErr::Io(e.to_string()))?;

	#[cfg(windows)]
	let _job = {
		match Job::new()
		{
			Ok(job) => { let _ = job.assign(&child); Some(job) },
			Err(_) => None,
		}
	};

	let mut stdout = child.stdout.take();
	let mut stderr = child.stderr.take();

	let (tx, rx) = mpsc::channel();
	let handle = std::thread::spawn(move || {
		let mut out = String::new();
		let mut err = String::new();
		if let Some(s) = stdout.as_mut() { let _ = s.read_to_string(&mut out); }
		if let Some(s) = stderr.as_mut() { let _ = s.read_to_string(&mut err); }
		let status = child.wait();
		let _ = tx.send((status, out, err));
	});

	match rx.recv_timeout(timeout)
	{
		Ok((Ok(status), out, err)) =>
		{
			let _ = handle.join();
			let mut combined = out;
			combined.push_str(&err);
			Ok(ScriptOutput { exit_code: status.code().unwrap_or(-1), combined_output: combined })
		},
		Ok((Err(e), _, _)) => Err(RunErr::Io(e.to_string())),
		Err(_) => Err(RunErr::Timeout),
	}
}
