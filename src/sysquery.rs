//! Injected system-query capability (§9 design note): registry reads and
//! process enumeration, behind a trait so the state evaluator (C6) and
//! blocking-app checker (C7) are unit-testable without a live Windows
//! host — the same shape as the fact provider's `FactSource`.

/// One entry under a Windows uninstall registry key (§4.6).
#[derive(Debug, Clone)]
pub(crate) struct UninstallEntry
{
	pub(crate) display_name: String,
	pub(crate) display_version: Option<String>,
}

/// One running process, as needed by the blocking-app matcher (§4.7).
#[derive(Debug, Clone)]
pub(crate) struct ProcessInfo
{
	pub(crate) name: String,
	pub(crate) exe_path: Option<String>,
}

pub(crate) trait SysQuery
{
	/// All entries across both hive roots (`SOFTWARE\...\Uninstall` and
	/// the WOW6432Node equivalent), in both `HKLM` and `HKCU` (§4.6).
	fn uninstall_entries(&self) -> Vec<UninstallEntry>;

	fn running_processes(&self) -> Vec<ProcessInfo>;

	/// Idle time since last user input, for the `auto` run mode's
	/// 300-second gate (§4.10 step 7).
	fn idle_seconds(&self) -> u64;

	/// The embedded `FileVersion` resource of a file on disk, used by
	/// the `installs` array's per-file version check (§4.6). `None` if
	/// the file has no version resource or doesn't exist.
	fn file_version(&self, path: &str) -> Option<String>;
}


#[cfg(windows)]
pub(crate) struct RealSysQuery;

#[cfg(windows)]
impl SysQuery for RealSysQuery
{
	fn uninstall_entries(&self) -> Vec<UninstallEntry>
	{
		use winreg::enums::*;
		use winreg::RegKey;

		let roots: &[(HKEY, &str)] = &[
			(HKEY_LOCAL_MACHINE, r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall"),
			(HKEY_LOCAL_MACHINE, r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall"),
			(HKEY_CURRENT_USER, r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall"),
			(HKEY_CURRENT_USER, r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall"),
		];

		let mut out = Vec::new();
		for (hive, path) in roots
		{
			let root = RegKey::predef(*hive);
			let Ok(key) = root.open_subkey(path) else { continue; };
			for name in key.enum_keys().flatten()
			{
				let Ok(subkey) = key.open_subkey(&name) else { continue; };
				let Ok(display_name): Result<String, _> = subkey.get_value("DisplayName")
				else { continue; };
				let display_version: Option<String> =
						subkey.get_value("DisplayVersion").ok();
				out.push(UninstallEntry { display_name, display_version });
			}
		}
		out
	}

	fn running_processes(&self) -> Vec<ProcessInfo>
	{
		use sysinfo::System;
		let mut sys = System::new_all();
		sys.refresh_processes();
		sys.processes().values().map(|p| ProcessInfo {
			name: p.name().to_string(),
			exe_path: p.exe().map(|p| p.to_string_lossy().into_owned()),
		}).collect()
	}

	fn idle_seconds(&self) -> u64
	{
		use windows::Win32::System::SystemInformation::GetTickCount;
		use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

		let mut info = LASTINPUTINFO {
			cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
			..Default::default()
		};

		if unsafe { GetLastInputInfo(&mut info) }.as_bool()
		{
			let now = unsafe { GetTickCount() };
			// Both tick counts wrap at ~49.7 days; a wrapped subtraction
			// is the accepted way to handle that here since it still
			// yields the correct elapsed span modulo the wrap period.
			(now.wrapping_sub(info.dwTime) as u64) / 1000
		}
		else { 0 }
	}

	fn file_version(&self, path: &str) -> Option<String>
	{
		let script = format!("(Get-Item -LiteralPath '{path}' \
				-ErrorAction Stop).VersionInfo.FileVersion");
		let output = std::process::Command::new("powershell.exe")
				.args(["-NoLogo", "-NoProfile", "-NonInteractive",
						"-ExecutionPolicy", "Bypass", "-Command", &script])
				.output().ok()?;
		if !output.status.success() { return None; }
		let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
		if text.is_empty() { None } else { Some(text) }
	}
}

#[cfg(not(windows))]
pub(crate) struct RealSysQuery;

#[cfg(not(windows))]
impl SysQuery for RealSysQuery
{
	fn uninstall_entries(&self) -> Vec<UninstallEntry> { Vec::new() }
	fn running_processes(&self) -> Vec<ProcessInfo> { Vec::new() }
	fn idle_seconds(&self) -> u64 { u64::MAX }
	fn file_version(&self, _path: &str) -> Option<String> { None }
}
