//! Resolver (C5): breadth-first manifest/catalog walk producing a
//! deduplicated list of work items.
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::cache::Cache;
use crate::catalog::{Catalog, CatalogEntry};
use crate::facts::FactMap;
use crate::fetch::{self, CancelToken, FetchKind, FetchPolicy};
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display)]
pub(crate) enum Action { Install, Update, Uninstall, Optional }

/// A resolved work item (§3): a manifest reference joined with its
/// catalog entry, if one was found.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem
{
	pub(crate) name: String,
	pub(crate) version: String,
	pub(crate) installer_location: String,
	pub(crate) supported_archs: Vec<String>,
	pub(crate) action: Action,
	pub(crate) source_manifest: String,
	pub(crate) on_demand: bool,
	pub(crate) catalog_refs: Option<CatalogEntry>,
}

pub(crate) struct ResolverConfig
{
	pub(crate) repo_base: String,
	pub(crate) client_identifier: String,
	pub(crate) default_catalog: String,
	pub(crate) self_service_manifest: Option<std::path::PathBuf>,
	pub(crate) self_service_opt_out: bool,
}

fn canonicalize_manifest_name(name: &str) -> String
{
	let slashed = name.replace('\\', "/");
	if slashed.ends_with(".yaml") { slashed } else { format!("{slashed}.yaml") }
}

fn fetch_and_parse_manifest(agent: &ureq::Agent, cache: &Cache, cfg: &ResolverConfig,
		policy: &FetchPolicy, cancel: &CancelToken, name: &str)
		-> Result<Manifest, String>
{
	let url = format!("{}/manifests/{}", cfg.repo_base, name);
	let path = fetch::fetch(agent, &url, FetchKind::Manifest, &cache.manifests_root,
			&cfg.repo_base, policy, cancel)
			.map_err(|e| format!("fetching manifest '{name}': {e}"))?;
	let bytes = std::fs::read(&path).map_err(|e| format!("reading manifest '{name}': {e}"))?;
	Manifest::parse(&bytes).map_err(|e| format!("parsing manifest '{name}': {e}"))
}

fn fetch_and_parse_catalog(agent: &ureq::Agent, cache: &Cache, cfg: &ResolverConfig,
		policy: &FetchPolicy, cancel: &CancelToken, name: &str)
		-> Result<Catalog, String>
{
	let url = format!("{}/catalogs/{}.yaml", cfg.repo_base, name);
	let path = fetch::fetch(agent, &url, FetchKind::Catalog, &cache.catalogs_root,
			&cfg.repo_base, policy, cancel)
			.map_err(|e| format!("fetching catalog '{name}': {e}"))?;
	let bytes = std::fs::read(&path).map_err(|e| format!("reading catalog '{name}': {e}"))?;
	Catalog::parse(&bytes).map_err(|e| format!("parsing catalog '{name}': {e}"))
}

/// Join a manifest-list name against the catalog map, emitting a
/// warning (via `warn`) for a name with no catalog entry (§4.5 step 6).
fn build_work_items(names: &[String], action: Action, source_manifest: &str,
		catalog: &HashMap<String, CatalogEntry>, seen: &mut HashSet<(Action, String)>,
		warn: &mut dyn FnMut(String)) -> Vec<WorkItem>
{
	let mut out = Vec::new();
	for name in names
	{
		let key = (action, name.to_ascii_lowercase());
		if !seen.insert(key) { continue; }

		match catalog.get(&name.to_ascii_lowercase())
		{
			Some(entry) => out.push(WorkItem {
				name: name.clone(),
				version: entry.version.clone(),
				installer_location: entry.installer_item.location.clone(),
				supported_archs: entry.supported_architectures.clone(),
				action,
				source_manifest: source_manifest.to_string(),
				on_demand: entry.on_demand,
				catalog_refs: Some(entry.clone()),
			}),
			None =>
			{
				warn(format!("'{name}' listed in manifest '{source_manifest}' \
						has no catalog entry"));
				out.push(WorkItem {
					name: name.clone(),
					version: String::new(),
					installer_location: String::new(),
					supported_archs: Vec::new(),
					action,
					source_manifest: source_manifest.to_string(),
					on_demand: false,
					catalog_refs: None,
				});
			},
		}
	}
	out
}

/// Resolve the full work list for `cfg.client_identifier` (§4.5).
pub(crate) fn resolve(agent: &ureq::Agent, cache: &Cache, cfg: &ResolverConfig,
		policy: &FetchPolicy, cancel: &CancelToken, facts: &FactMap,
		warn: &mut dyn FnMut(String)) -> Vec<WorkItem>
{
	let mut visited: HashSet<String> = HashSet::new();
	let mut queue: VecDeque<String> = VecDeque::new();
	queue.push_back(cfg.client_identifier.clone());

	let mut catalog_map: HashMap<String, CatalogEntry> = HashMap::new();
	let mut merged_per_manifest: Vec<(String, crate::predicate::MergedLists)> = Vec::new();
	let mut any_catalogs_referenced = false;

	while let Some(raw_name) = queue.pop_front()
	{
		let name = canonicalize_manifest_name(&raw_name);
		if visited.contains(&name) { continue; }
		visited.insert(name.clone());

		let manifest = match fetch_and_parse_manifest(agent, cache, cfg, policy, cancel, &name)
		{
			Ok(m) => m,
			Err(e) => { warn(e); continue; },
		};

		for included in &manifest.included_manifests
		{
			let canon = canonicalize_manifest_name(included);
			if !visited.contains(&canon) { queue.push_back(canon); }
		}

		if !manifest.catalogs.is_empty() { any_catalogs_referenced = true; }
		for catalog_name in &manifest.catalogs
		{
			match fetch_and_parse_catalog(agent, cache, cfg, policy, cancel, catalog_name)
			{
				Ok(cat) => for entry in cat.items
				{ catalog_map.insert(entry.name.to_ascii_lowercase(), entry); },
				Err(e) => warn(e),
			}
		}

		let mut merged = crate::predicate::MergedLists::default();
		merged.installs = manifest.managed_installs.clone();
		merged.updates = manifest.managed_updates.clone();
		merged.uninstalls = manifest.managed_uninstalls.clone();
		merged.optionals = manifest.optional_installs.clone();

		for ci in &manifest.conditional_items
		{
			let child = ci.evaluate(facts, warn);
			merged.installs.extend(child.installs);
			merged.updates.extend(child.updates);
			merged.uninstalls.extend(child.uninstalls);
			merged.optionals.extend(child.optionals);
			// profiles/apps are consumed for dedup only (§4.5); no work
			// items are emitted for them here.

			for included in &child.manifests
			{
				let canon = canonicalize_manifest_name(included);
				if !visited.contains(&canon) { queue.push_back(canon); }
			}
		}

		merged_per_manifest.push((name, merged));
	}

	if !any_catalogs_referenced
	{
		if let Ok(cat) = fetch_and_parse_catalog(agent, cache, cfg, policy, cancel,
				&cfg.default_catalog)
		{
			for entry in cat.items
			{ catalog_map.entry(entry.name.to_ascii_lowercase()).or_insert(entry); }
		}
	}

	let mut seen: HashSet<(Action, String)> = HashSet::new();
	let mut items = Vec::new();

	for (name, merged) in &merged_per_manifest
	{
		items.extend(build_work_items(&merged.installs, Action::Install, name,
				&catalog_map, &mut seen, warn));
		items.extend(build_work_items(&merged.updates, Action::Update, name,
				&catalog_map, &mut seen, warn));
		items.extend(build_work_items(&merged.uninstalls, Action::Uninstall, name,
				&catalog_map, &mut seen, warn));
		items.extend(build_work_items(&merged.optionals, Action::Optional, name,
				&catalog_map, &mut seen, warn));
	}

	if !cfg.self_service_opt_out
	{
		if let Some(path) = &cfg.self_service_manifest
		{
			if let Some(manifest) = load_local_manifest(path, warn)
			{
				items.extend(build_work_items(&manifest.managed_installs, Action::Install,
						"self-service", &catalog_map, &mut seen, warn));
				items.extend(build_work_items(&manifest.managed_uninstalls, Action::Uninstall,
						"self-service", &catalog_map, &mut seen, warn));
			}
		}
	}

	items
}

fn load_local_manifest(path: &Path, warn: &mut dyn FnMut(String)) -> Option<Manifest>
{
	let bytes = match std::fs::read(path)
	{
		Ok(b) => b,
		Err(e) => { warn(format!("reading self-service manifest: {e}")); return None; },
	};
	match Manifest::parse(&bytes)
	{
		Ok(m) => Some(m),
		Err(e) => { warn(format!("parsing self-service manifest: {e}")); None },
	}
}


#[cfg(test)]
mod tests
{
	use super::*;
	use crate::catalog::{InstallerDescriptor, InstallerType};
	use crate::hash::Sha256Hash;

	fn sample_entry(name: &str) -> CatalogEntry
	{
		CatalogEntry {
			name: name.to_string(),
			version: "1.0".to_string(),
			supported_architectures: vec!["x64".to_string()],
			installer_item: InstallerDescriptor {
				location: format!("apps/{name}.msi"),
				hash: Sha256Hash::default(),
				kind: InstallerType::Msi,
				size: 1000,
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

	#[test]
	fn canonicalizes_manifest_names()
	{
		assert_eq!(canonicalize_manifest_name("site\\laptops"), "site/laptops.yaml");
		assert_eq!(canonicalize_manifest_name("site/laptops.yaml"), "site/laptops.yaml");
	}

	#[test]
	fn build_work_items_dedups_and_warns_on_missing_catalog_entry()
	{
		let mut catalog = HashMap::new();
		catalog.insert("firefox".to_string(), sample_entry("Firefox"));

		let mut seen = HashSet::new();
		let mut warnings = Vec::new();
		let mut warn = |s: String| warnings.push(s);

		let names = vec!["Firefox".to_string(), "Firefox".to_string(), "Ghost".to_string()];
		let items = build_work_items(&names, Action::Install, "site.yaml",
				&catalog, &mut seen, &mut warn);

		assert_eq!(items.len(), 2);
		assert_eq!(items[0].version, "1.0");
		assert_eq!(items[1].version, "");
		assert_eq!(warnings.len(), 1);
	}

	#[test]
	fn dedup_key_is_per_action()
	{
		let catalog = HashMap::new();
		let mut seen = HashSet::new();
		let mut warn = |_: String| {};

		let installs = build_work_items(&["Tool".to_string()], Action::Install, "m",
				&catalog, &mut seen, &mut warn);
		let updates = build_work_items(&["Tool".to_string()], Action::Update, "m",
				&catalog, &mut seen, &mut warn);

		assert_eq!(installs.len(), 1);
		assert_eq!(updates.len(), 1);
	}
}
