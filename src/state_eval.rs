//! State evaluator (C6): deciding whether a resolved work item actually
//! needs action on this machine.
use std::cmp::Ordering;
use std::time::Duration;

use crate::facts::FactMap;
use crate::hash::md5_file;
use crate::resolver::WorkItem;
use crate::script::ScriptRunner;
use crate::sysquery::SysQuery;

/// `amd64`/`x86_64` normalize to `x64` (§4.6); everything else passes
/// through [`crate::facts::normalize_arch`]'s casing rules.
fn normalize_arch(raw: &str) -> String
{ crate::facts::normalize_arch(raw) }

/// Dotted-numeric version compare with trailing-zero normalization;
/// non-numeric segments compare lexicographically (§4.6).
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering
{
	let pa: Vec<&str> = a.split('.').collect();
	let pb: Vec<&str> = b.split('.').collect();
	let len = pa.len().max(pb.len());

	for i in 0..len
	{
		let sa = pa.get(i).copied().unwrap_or("0");
		let sb = pb.get(i).copied().unwrap_or("0");

		let cmp = match (sa.parse::<u64>(), sb.parse::<u64>())
		{
			(Ok(na), Ok(nb)) => na.cmp(&nb),
			_ => sa.cmp(sb),
		};

		if cmp != Ordering::Equal { return cmp; }
	}

	Ordering::Equal
}

/// Result of the architecture compatibility filter.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ArchCheck { Compatible, Incompatible }

pub(crate) fn check_arch(supported: &[String], system_arch: &str) -> ArchCheck
{
	if supported.is_empty() { return ArchCheck::Compatible; }
	let system = normalize_arch(system_arch);
	if supported.iter().any(|a| normalize_arch(a) == system)
	{ ArchCheck::Compatible } else { ArchCheck::Incompatible }
}

/// `needs_action(item) -> bool` (§4.6's decision tree).
pub(crate) fn needs_action(item: &WorkItem, facts: &FactMap, sys: &dyn SysQuery,
		scripts: &dyn ScriptRunner, installcheck_timeout: Duration,
		warn: &mut dyn FnMut(String)) -> bool
{
	let Some(entry) = &item.catalog_refs else {
		// No catalog entry at all (resolver already warned); nothing to
		// act on meaningfully.
		return false;
	};

	let system_arch = facts.get("arch").map(|f| f.as_compare_str()).unwrap_or_default();
	if check_arch(&entry.supported_architectures, &system_arch) == ArchCheck::Incompatible
	{
		warn(format!("'{}' is not compatible with this machine's architecture \
				('{system_arch}' not in {:?})", item.name, entry.supported_architectures));
		return false;
	}

	if entry.on_demand { return true; }

	if let Some(script) = &entry.installcheck_script
	{
		return match scripts.run_script(script, installcheck_timeout)
		{
			Ok(out) => out.exit_code == 0,
			Err(e) =>
			{
				warn(format!("installcheck script for '{}' failed to run: {e}", item.name));
				true
			},
		};
	}

	if !entry.installs.is_empty()
	{
		for file in &entry.installs
		{
			let Ok(meta) = std::fs::metadata(&file.path) else { return true; };
			if meta.is_dir() { return true; }

			if let Some(expect) = &file.md5checksum
			{
				match md5_file(std::path::Path::new(&file.path))
				{
					Ok(actual) if actual == *expect => {},
					_ => return true,
				}
			}

			if let Some(expect_version) = &file.version
			{
				match sys.file_version(&file.path)
				{
					Some(actual) if compare_versions(&actual, expect_version) != Ordering::Less => {},
					_ => return true,
				}
			}
		}
		return false;
	}

	let normalized_name = item.name.to_ascii_lowercase();
	let found = sys.uninstall_entries().into_iter()
			.find(|e| e.display_name.to_ascii_lowercase() == normalized_name);

	match found
	{
		None => true,
		Some(e) => match &e.display_version
		{
			None => false,
			Some(installed) => compare_versions(installed, &item.version) == Ordering::Less,
		},
	}
}


#[cfg(test)]
mod tests
{
	use super::*;
	use crate::catalog::{CatalogEntry, InstallCheckFile, InstallerDescriptor, InstallerType};
	use crate::hash::Sha256Hash;
	use crate::resolver::Action;
	use crate::script::tests::FakeScriptRunner;
	use crate::sysquery::tests::FakeSysQuery;
	use crate::sysquery::UninstallEntry;
	use std::collections::HashMap;

	fn base_entry(name: &str, version: &str) -> CatalogEntry
	{
		CatalogEntry {
			name: name.to_string(),
			version: version.to_string(),
			supported_architectures: Vec::new(),
			installer_item: InstallerDescriptor {
				location: "apps/x.msi".to_string(),
				hash: Sha256Hash::default(),
				kind: InstallerType::Msi,
				size: 10,
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
			blocking_applications: Vec::new(),
			installs: Vec::new(),
		}
	}

	fn item_for(entry: CatalogEntry) -> WorkItem
	{
		WorkItem {
			name: entry.name.clone(),
			version: entry.version.clone(),
			installer_location: entry.installer_item.location.clone(),
			supported_archs: entry.supported_architectures.clone(),
			action: Action::Install,
			source_manifest: "site.yaml".to_string(),
			on_demand: entry.on_demand,
			catalog_refs: Some(entry),
		}
	}

	fn facts() -> FactMap
	{ HashMap::from([("arch".to_string(), "x64".into())]) }

	#[test]
	fn version_compare_trailing_zero()
	{
		assert_eq!(compare_versions("1.2.0", "1.2"), Ordering::Equal);
		assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
		assert_eq!(compare_versions("1.2.a", "1.2.b"), Ordering::Less);
	}

	#[test]
	fn on_demand_always_needs_action()
	{
		let mut e = base_entry("Tool", "1.0");
		e.on_demand = true;
		let item = item_for(e);
		let sys = FakeSysQuery::default();
		let scripts = FakeScriptRunner { exit_code: 1, output: String::new() };
		let mut warn = |_: String| {};
		assert!(needs_action(&item, &facts(), &sys, &scripts, Duration::from_secs(1), &mut warn));
	}

	#[test]
	fn installcheck_script_zero_means_needs_install()
	{
		let mut e = base_entry("Tool", "1.0");
		e.installcheck_script = Some("C:\\check.ps1".to_string());
		let item = item_for(e);
		let sys = FakeSysQuery::default();
		let scripts = FakeScriptRunner { exit_code: 0, output: String::new() };
		let mut warn = |_: String| {};
		assert!(needs_action(&item, &facts(), &sys, &scripts, Duration::from_secs(1), &mut warn));

		let scripts_installed = FakeScriptRunner { exit_code: 1, output: String::new() };
		assert!(!needs_action(&item, &facts(), &sys, &scripts_installed,
				Duration::from_secs(1), &mut warn));
	}

	#[test]
	fn registry_version_comparison()
	{
		let item = item_for(base_entry("Firefox", "128.0"));
		let mut warn = |_: String| {};
		let scripts = FakeScriptRunner { exit_code: 0, output: String::new() };

		let missing = FakeSysQuery::default();
		assert!(needs_action(&item, &facts(), &missing, &scripts,
				Duration::from_secs(1), &mut warn));

		let older = FakeSysQuery {
			uninstalls: vec![UninstallEntry {
				display_name: "Firefox".to_string(),
				display_version: Some("120.0".to_string()),
			}],
			..Default::default()
		};
		assert!(needs_action(&item, &facts(), &older, &scripts,
				Duration::from_secs(1), &mut warn));

		let current = FakeSysQuery {
			uninstalls: vec![UninstallEntry {
				display_name: "Firefox".to_string(),
				display_version: Some("128.0".to_string()),
			}],
			..Default::default()
		};
		assert!(!needs_action(&item, &facts(), &current, &scripts,
				Duration::from_secs(1), &mut warn));
	}

	#[test]
	fn incompatible_arch_is_never_needed()
	{
		let mut e = base_entry("Tool", "1.0");
		e.supported_architectures = vec!["arm64".to_string()];
		let item = item_for(e);
		let sys = FakeSysQuery::default();
		let scripts = FakeScriptRunner { exit_code: 0, output: String::new() };
		let mut warnings = Vec::new();
		let mut warn = |s: String| warnings.push(s);
		assert!(!needs_action(&item, &facts(), &sys, &scripts, Duration::from_secs(1), &mut warn));
		assert_eq!(warnings.len(), 1);
	}

	#[test]
	fn installs_array_missing_file_needs_install()
	{
		let mut e = base_entry("Tool", "1.0");
		e.installs = vec![InstallCheckFile {
			kind: "file".to_string(),
			path: "C:\\nonexistent\\tool.exe".to_string(),
			md5checksum: None,
			version: None,
		}];
		let item = item_for(e);
		let sys = FakeSysQuery::default();
		let scripts = FakeScriptRunner { exit_code: 0, output: String::new() };
		let mut warn = |_: String| {};
		assert!(needs_action(&item, &facts(), &sys, &scripts, Duration::from_secs(1), &mut warn));
	}
}
