//! Blocking-app checker (C7): does some candidate process name already
//! match a running process, and so block this item's install?
use crate::catalog::CatalogEntry;
use crate::sysquery::{ProcessInfo, SysQuery};

/// Derive match candidates (§4.7): verbatim `blocking_applications` if
/// present, else basenames of `installs` entries of type `application`.
fn candidates(entry: &CatalogEntry) -> Vec<String>
{
	if !entry.blocking_applications.is_empty()
	{ return entry.blocking_applications.clone(); }

	entry.installs.iter()
			.filter(|f| f.kind == "application" && !f.path.is_empty())
			.map(|f| basename(&f.path))
			.collect()
}

fn basename(path: &str) -> String
{
	path.replace('\\', "/").rsplit('/').next().unwrap_or(path).to_string()
}

fn is_drive_or_unc_prefixed(candidate: &str) -> bool
{
	candidate.starts_with('/')
			|| (candidate.len() >= 3 && candidate.as_bytes()[1] == b':'
					&& (candidate.as_bytes()[2] == b'\\' || candidate.as_bytes()[2] == b'/'))
}

fn matches_process(candidate: &str, proc: &ProcessInfo) -> bool
{
	if is_drive_or_unc_prefixed(candidate)
	{
		return proc.exe_path.as_deref()
				.map(|p| p.eq_ignore_ascii_case(candidate))
				.unwrap_or(false);
	}

	if candidate.to_ascii_lowercase().ends_with(".exe")
	{
		return proc.name.eq_ignore_ascii_case(candidate);
	}

	proc.name.eq_ignore_ascii_case(candidate)
			|| proc.name.eq_ignore_ascii_case(&format!("{candidate}.exe"))
}

/// `is_blocked(item) -> (bool, [running_names])` (§4.7).
pub(crate) fn is_blocked(entry: &CatalogEntry, sys: &dyn SysQuery) -> (bool, Vec<String>)
{
	let cands = candidates(entry);
	if cands.is_empty() { return (false, Vec::new()); }

	let processes = sys.running_processes();
	let mut hits = Vec::new();

	for cand in &cands
	{
		for proc in &processes
		{
			if matches_process(cand, proc)
			{
				hits.push(proc.name.clone());
				break;
			}
		}
	}

	(!hits.is_empty(), hits)
}


#[cfg(test)]
mod tests
{
	use super::*;
	use crate::catalog::{InstallCheckFile, InstallerDescriptor, InstallerType};
	use crate::hash::Sha256Hash;
	use crate::sysquery::tests::FakeSysQuery;

	fn entry_with(blocking: Vec<&str>, installs: Vec<InstallCheckFile>) -> CatalogEntry
	{
		CatalogEntry {
			name: "Tool".to_string(),
			version: "1.0".to_string(),
			supported_architectures: Vec::new(),
			installer_item: InstallerDescriptor {
				location: "apps/tool.msi".to_string(),
				hash: Sha256Hash::default(),
				kind: InstallerType::Msi,
				size: 1,
				arguments: Vec::new(),
			},
			uninstaller_item: None,
			on_demand: false,
			installcheck_script: None,
			preinstall_script: None,
			postinstall_script: None,
			preuninstall_script: None,
			postuninstall_script: None,
			uninstallcheck_script: None,
			blocking_applications: blocking.into_iter().map(String::from).collect(),
			installs,
		}
	}

	fn proc(name: &str, exe: Option<&str>) -> ProcessInfo
	{ ProcessInfo { name: name.to_string(), exe_path: exe.map(String::from) } }

	#[test]
	fn bare_name_matches_with_or_without_exe_suffix()
	{
		let entry = entry_with(vec!["notepad"], vec![]);
		let sys = FakeSysQuery {
			processes: vec![proc("notepad.exe", None)],
			..Default::default()
		};
		let (blocked, hits) = is_blocked(&entry, &sys);
		assert!(blocked);
		assert_eq!(hits, vec!["notepad.exe"]);
	}

	#[test]
	fn exe_suffixed_candidate_matches_basename_only()
	{
		let entry = entry_with(vec!["chrome.exe"], vec![]);
		let sys = FakeSysQuery {
			processes: vec![proc("chrome.exe", Some(r"C:\Other\chrome.exe"))],
			..Default::default()
		};
		let (blocked, _) = is_blocked(&entry, &sys);
		assert!(blocked);
	}

	#[test]
	fn drive_prefixed_candidate_matches_full_path()
	{
		let entry = entry_with(vec![r"C:\Program Files\Tool\tool.exe"], vec![]);
		let matching = FakeSysQuery {
			processes: vec![proc("tool.exe", Some(r"C:\Program Files\Tool\tool.exe"))],
			..Default::default()
		};
		let (blocked, _) = is_blocked(&entry, &matching);
		assert!(blocked);

		let other_path = FakeSysQuery {
			processes: vec![proc("tool.exe", Some(r"C:\Other\tool.exe"))],
			..Default::default()
		};
		let (blocked2, _) = is_blocked(&entry, &other_path);
		assert!(!blocked2);
	}

	#[test]
	fn no_candidates_means_never_blocked()
	{
		let entry = entry_with(vec![], vec![]);
		let sys = FakeSysQuery {
			processes: vec![proc("whatever.exe", None)],
			..Default::default()
		};
		let (blocked, hits) = is_blocked(&entry, &sys);
		assert!(!blocked);
		assert!(hits.is_empty());
	}

	#[test]
	fn derives_candidates_from_installs_array_applications()
	{
		let entry = entry_with(vec![], vec![InstallCheckFile {
			kind: "application".to_string(),
			path: r"C:\Program Files\Tool\tool.exe".to_string(),
			md5checksum: None,
			version: None,
		}]);
		let sys = FakeSysQuery {
			processes: vec![proc("tool.exe", None)],
			..Default::default()
		};
		let (blocked, _) = is_blocked(&entry, &sys);
		assert!(blocked);
	}
}
