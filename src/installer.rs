//! Installer dispatcher (C8): per-type invocation, timeout, blocking-app
//! gate, and exit-code/output classification.
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::blocking;
use crate::catalog::{CatalogEntry, InstallerType};
use crate::jobtimeout::{run_with_timeout, RunErr};
use crate::resolver::{Action, WorkItem};
use crate::script::ScriptRunner;
use crate::sysquery::SysQuery;

/// The per-item state machine (§4.8). Only the terminal variants are
/// logged as a "complete" event by the session logger; the others are
/// transient progress markers the orchestrator steps through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallState
{
	Pending,
	Downloading,
	Downloaded,
	PreInstallScript,
	Installing,
	PostInstallScript,
	Installed,
	Failed,
	Blocked,
	ArchMismatch,
	Timeout,
}

impl InstallState
{
	pub(crate) fn is_terminal(self) -> bool
	{
		matches!(self, Self::Installed | Self::Failed | Self::Blocked
				| Self::ArchMismatch | Self::Timeout)
	}
}

#[derive(Debug)]
pub(crate) struct InstallOutcome
{
	pub(crate) state: InstallState,
	pub(crate) output: String,
	pub(crate) exit_code: Option<i32>,
	pub(crate) reboot_required: bool,
	pub(crate) blocked_by: Vec<String>,
}

fn build_command(kind: InstallerType, entry: &CatalogEntry, local_file: &Path,
		action: Action) -> Command
{
	match kind
	{
		InstallerType::Msi =>
		{
			let mut cmd = Command::new("msiexec.exe");
			let verb = if action == Action::Uninstall { "/x" } else { "/i" };
			cmd.arg(verb).arg(local_file).args(["/qn", "/norestart"]);
			cmd.args(&entry.installer_item.arguments);
			cmd
		},

		InstallerType::Exe =>
		{
			let mut cmd = Command::new(local_file);
			cmd.args(&entry.installer_item.arguments);
			cmd
		},

		InstallerType::Ps1 =>
		{
			let mut cmd = Command::new("powershell.exe");
			let invoke = format!("& '{}' 2>&1", local_file.display());
			cmd.args(["-NoLogo", "-NoProfile", "-NonInteractive",
					"-ExecutionPolicy", "Bypass", "-Command", &invoke]);
			cmd
		},

		InstallerType::Bat =>
		{
			let mut cmd = Command::new("cmd.exe");
			cmd.arg("/c").arg(local_file);
			cmd
		},

		InstallerType::Nupkg =>
		{
			// Chocolatey-style deployment: the nupkg's tools/ payload is
			// expected to have already been extracted under the
			// ProgramData lib path by the fetcher/cache layer; invoking
			// it here means running its own chocolateyInstall.ps1.
			let id = local_file.file_stem().map(|s| s.to_string_lossy().into_owned())
					.unwrap_or_else(|| entry.name.clone());
			let script = format!(
					r"C:\ProgramData\chocolatey\lib\{id}\tools\chocolateyInstall.ps1");
			let mut cmd = Command::new("powershell.exe");
			let invoke = format!("& '{script}' 2>&1");
			cmd.args(["-NoLogo", "-NoProfile", "-NonInteractive",
					"-ExecutionPolicy", "Bypass", "-Command", &invoke]);
			cmd
		},

		InstallerType::Msix =>
		{
			// No external process for MSIX — handled by `install_msix`
			// via the platform deployment API. This branch only exists
			// so `build_command` is total; `install` special-cases Msix
			// before calling here.
			Command::new("cmd.exe")
		},
	}
}

#[cfg(windows)]
fn install_msix(local_file: &Path) -> Result<(), String>
{
	use windows::core::HSTRING;
	use windows::Management::Deployment::PackageManager;

	let uri = windows::Foundation::Uri::CreateUri(&HSTRING::from(
			local_file.to_string_lossy().into_owned()))
			.map_err(|e| e.to_string())?;

	let manager = PackageManager::new().map_err(|e| e.to_string())?;
	let op = manager.AddPackageAsync(&uri, None, Default::default())
			.map_err(|e| e.to_string())?;

	// `AddPackageAsync` is async-over-WinRT; blocking-wait it here since
	// the outer loop is single-threaded by design (§5).
	op.get().map_err(|e| e.to_string())?;
	Ok(())
}

#[cfg(not(windows))]
fn install_msix(_local_file: &Path) -> Result<(), String>
{ Err("MSIX installs require Windows".to_string()) }

fn classify(exit_code: i32, output: &str, kind: InstallerType) -> (InstallState, bool)
{
	if exit_code == 0 { return (InstallState::Installed, false); }

	if output.to_ascii_lowercase().contains("unsupported architecture")
	{ return (InstallState::ArchMismatch, false); }

	if kind == InstallerType::Msi && exit_code == 3010
	{ return (InstallState::Installed, true); }

	(InstallState::Failed, false)
}

/// `install(item, local_file, action) -> (output, error)` (§4.8),
/// folded here into a single `InstallOutcome` carrying both.
pub(crate) fn install(item: &WorkItem, local_file: &Path, action: Action,
		sys: &dyn SysQuery, scripts: &dyn ScriptRunner, timeout: Duration,
		warn: &mut dyn FnMut(String)) -> InstallOutcome
{
	let Some(entry) = &item.catalog_refs else {
		return InstallOutcome {
			state: InstallState::Failed,
			output: "no catalog entry to install from".to_string(),
			exit_code: None,
			reboot_required: false,
			blocked_by: Vec::new(),
		};
	};

	let (blocked, running) = blocking::is_blocked(entry, sys);
	if blocked
	{
		return InstallOutcome {
			state: InstallState::Blocked,
			output: format!("blocked by running processes: {}", running.join(", ")),
			exit_code: None,
			reboot_required: false,
			blocked_by: running,
		};
	}

	if let Some(pre) = &entry.preinstall_script
	{
		match scripts.run_script(pre, timeout)
		{
			Ok(out) if out.exit_code != 0 => return InstallOutcome {
				state: InstallState::Failed,
				output: format!("preinstall script failed ({}): {}", out.exit_code,
						out.combined_output),
				exit_code: Some(out.exit_code),
				reboot_required: false,
				blocked_by: Vec::new(),
			},
			Ok(_) => {},
			Err(e) => return InstallOutcome {
				state: InstallState::Failed,
				output: format!("preinstall script could not run: {e}"),
				exit_code: None,
				reboot_required: false,
				blocked_by: Vec::new(),
			},
		}
	}

	let kind = entry.installer_item.kind;

	let main_result = if kind == InstallerType::Msix
	{
		match install_msix(local_file)
		{
			Ok(()) => Ok(crate::script::ScriptOutput { exit_code: 0, combined_output: String::new() }),
			Err(e) => Ok(crate::script::ScriptOutput { exit_code: 1, combined_output: e }),
		}
	}
	else
	{
		let cmd = build_command(kind, entry, local_file, action);
		run_with_timeout(cmd, timeout)
	};

	let (state, output, exit_code, reboot) = match main_result
	{
		Ok(out) =>
		{
			let (state, reboot) = classify(out.exit_code, &out.combined_output, kind);
			(state, out.combined_output, Some(out.exit_code), reboot)
		},
		Err(RunErr::Timeout) => (InstallState::Timeout, "installer timed out".to_string(), None, false),
		Err(RunErr::Io(e)) => (InstallState::Failed, format!("failed to launch installer: {e}"),
				None, false),
	};

	if state == InstallState::Installed
	{
		if let Some(post) = &entry.postinstall_script
		{
			match scripts.run_script(post, timeout)
			{
				Ok(out) if out.exit_code != 0 => warn(format!("postinstall script '{post}' \
						exited {}: {}", out.exit_code, out.combined_output)),
				Ok(_) => {},
				Err(e) => warn(format!("postinstall script '{post}' could not run: {e}")),
			}
			// Overall status stays Installed either way (§4.8).
		}
	}

	InstallOutcome { state, output, exit_code, reboot_required: reboot, blocked_by: Vec::new() }
}


#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn exit_zero_is_success()
	{
		let (state, reboot) = classify(0, "", InstallerType::Msi);
		assert_eq!(state, InstallState::Installed);
		assert!(!reboot);
	}

	#[test]
	fn msi_3010_is_success_with_reboot()
	{
		let (state, reboot) = classify(3010, "", InstallerType::Msi);
		assert_eq!(state, InstallState::Installed);
		assert!(reboot);
	}

	#[test]
	fn unsupported_architecture_output_is_arch_mismatch()
	{
		let (state, _) = classify(1, "ERROR: Unsupported Architecture detected", InstallerType::Exe);
		assert_eq!(state, InstallState::ArchMismatch);
	}

	#[test]
	fn other_nonzero_is_installer_error()
	{
		let (state, _) = classify(1603, "generic failure", InstallerType::Msi);
		assert_eq!(state, InstallState::Failed);
	}

	#[test]
	fn terminal_states()
	{
		assert!(InstallState::Installed.is_terminal());
		assert!(InstallState::Blocked.is_terminal());
		assert!(!InstallState::Installing.is_terminal());
		assert!(!InstallState::Pending.is_terminal());
	}
}
