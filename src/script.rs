//! PowerShell host invocation, shared by the state evaluator's
//! installcheck scripts (C6) and the installer dispatcher's pre/post
//! install scripts (C8). Kept as a trait so both callers can be tested
//! without spawning a real process.
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct ScriptOutput
{
	pub(crate) exit_code: i32,
	pub(crate) combined_output: String,
}

pub(crate) trait ScriptRunner
{
	/// Run `script_path` under a PowerShell host with the flags §4.8
	/// specifies, returning its exit code and combined stdout/stderr.
	fn run_script(&self, script_path: &str, timeout: Duration) -> std::io::Result<ScriptOutput>;
}

pub(crate) struct RealScriptRunner;

impl ScriptRunner for RealScriptRunner
{
	fn run_script(&self, script_path: &str, timeout: Duration) -> std::io::Result<ScriptOutput>
	{
		// Reuses the same process-tree-vs-timeout race the installer
		// dispatcher uses for the main installer invocation (C8) —
		// installcheck/pre/post scripts are just as capable of hanging.
		let command = format!("& '{script_path}' 2>&1");
		let mut cmd = std::process::Command::new("powershell.exe");
		cmd.args(["-NoLogo", "-NoProfile", "-NonInteractive",
				"-ExecutionPolicy", "Bypass", "-Command", &command]);

		crate::jobtimeout::run_with_timeout(cmd, timeout)
				.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
	}
}


#[cfg(test)]
pub(crate) mod tests
{
	use super::*;

	pub(crate) struct FakeScriptRunner
	{
		pub(crate) exit_code: i32,
		pub(crate) output: String,
	}

	impl ScriptRunner for FakeScriptRunner
	{
		fn run_script(&self, _script_path: &str, _timeout: Duration)
				-> std::io::Result<ScriptOutput>
		{
			Ok(ScriptOutput { exit_code: self.exit_code, combined_output: self.output.clone() })
		}
	}

	#[test]
	fn fake_returns_configured_result()
	{
		let runner = FakeScriptRunner { exit_code: 0, output: "ok".to_string() };
		let out = runner.run_script("C:\\script.ps1", Duration::from_secs(1)).unwrap();
		assert_eq!(out.exit_code, 0);
		assert_eq!(out.combined_output, "ok");
	}
}
