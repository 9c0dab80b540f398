//! System facts (C3): the mapping from fact key to value that the
//! predicate engine (§4.4) evaluates conditional items against.
use std::collections::HashMap;


/// A single fact's value.  Facts may come in as strings, integers, or
/// booleans (from env vars, system queries, or test fixtures); the
/// predicate engine mostly coerces everything to a string for
/// comparison, except numeric `==`/`!=` (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FactValue
{
	Str(String),
	Int(i64),
	Bool(bool),
}

impl FactValue
{
	/// The string used for every operator except the numeric fast path
	/// on `==`/`!=`.
	pub(crate) fn as_compare_str(&self) -> String
	{
		match self
		{
			Self::Str(s)  => s.clone(),
			Self::Int(i)  => i.to_string(),
			Self::Bool(b) => b.to_string(),
		}
	}

	/// If both the fact and the condition's value parse as numbers,
	/// `==`/`!=` compares numerically instead of as strings (§4.4).
	pub(crate) fn as_f64(&self) -> Option<f64>
	{
		match self
		{
			Self::Int(i) => Some(*i as f64),
			Self::Bool(_) => None,
			Self::Str(s) => s.parse().ok(),
		}
	}
}

impl From<&str> for FactValue
{ fn from(s: &str) -> Self { Self::Str(s.to_string()) } }
impl From<String> for FactValue
{ fn from(s: String) -> Self { Self::Str(s) } }
impl From<i64> for FactValue
{ fn from(i: i64) -> Self { Self::Int(i) } }
impl From<bool> for FactValue
{ fn from(b: bool) -> Self { Self::Bool(b) } }


/// The full set of facts gathered for a run.  A plain map keeps the
/// predicate engine decoupled from exactly which facts exist; new keys
/// can be added here without touching §4.4's evaluator.
pub(crate) type FactMap = HashMap<String, FactValue>;


/// Normalize a `PROCESSOR_ARCHITECTURE`-style string to the
/// `x64`/`x86`/`arm64` vocabulary used by `supported_architectures`
/// (§4.6's architecture filter shares this).
pub(crate) fn normalize_arch(raw: &str) -> String
{
	match raw.to_ascii_uppercase().as_str()
	{
		"AMD64" | "X86_64" => "x64".to_string(),
		"X86" | "386"      => "x86".to_string(),
		"ARM64"            => "arm64".to_string(),
		other              => other.to_ascii_lowercase(),
	}
}


/// Anything that can hand us the facts a real Windows host would have.
/// Kept as a trait (rather than calling `std::env`/registry/WMI
/// directly from `gather()`) so tests can supply a fixed fact set
/// without needing a live machine — the same "injected system
/// capability" shape the state evaluator uses for registry queries
/// (§9 design note).
pub(crate) trait FactSource
{
	fn env(&self, key: &str) -> Option<String>;
	fn hostname(&self) -> String;
	fn os_version(&self) -> (u32, u32);
	fn os_build_number(&self) -> String;
	fn machine_type(&self) -> String;
	fn serial_number(&self) -> String;
}


/// The real `FactSource`, reading the live environment and OS.
pub(crate) struct HostFacts;

impl FactSource for HostFacts
{
	fn env(&self, key: &str) -> Option<String>
	{ std::env::var(key).ok() }

	fn hostname(&self) -> String
	{
		hostname::get()
				.map(|h| h.to_string_lossy().into_owned())
				.unwrap_or_else(|_| "unknown-host".to_string())
	}

	fn os_version(&self) -> (u32, u32)
	{
		use sysinfo::System;
		// sysinfo hands back a dotted string like "10.0.22631"; we only
		// care about major.minor for the `os_version`/`os_vers_major`/
		// `os_vers_minor` facts.
		let raw = System::os_version().unwrap_or_default();
		let mut parts = raw.split('.');
		let major: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
		let minor: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
		(major, minor)
	}

	fn os_build_number(&self) -> String
	{
		use sysinfo::System;
		System::kernel_version().unwrap_or_else(|| "0".to_string())
	}

	fn machine_type(&self) -> String
	{
		// No universally-reliable chassis-type API without WMI; lean on
		// a battery-presence heuristic, with "desktop" as the safe
		// default if we can't tell.
		if std::path::Path::new(r"C:\Windows\System32\battery.exe").exists()
		{ "laptop".to_string() }
		else { "desktop".to_string() }
	}

	fn serial_number(&self) -> String
	{
		// Real serial retrieval goes through WMI (Win32_BIOS.SerialNumber);
		// that's out of scope for the facts we can get from sysinfo/env,
		// so surface a sentinel rather than guessing.
		std::env::var("CIMIAN_SERIAL_OVERRIDE").unwrap_or_else(|_| "unknown".to_string())
	}
}


/// Build the full fact map (§4.3's table) from a `FactSource`.
pub(crate) fn gather(src: &dyn FactSource) -> FactMap
{
	let mut facts = FactMap::new();

	facts.insert("hostname".to_string(), src.hostname().into());

	let raw_arch = src.env("PROCESSOR_ARCHITECTURE").unwrap_or_default();
	let arch = normalize_arch(&raw_arch);
	facts.insert("arch".to_string(), arch.clone().into());
	facts.insert("architecture".to_string(), arch.into());

	if let Some(dom) = src.env("USERDOMAIN")
	{ facts.insert("domain".to_string(), dom.into()); }
	if let Some(user) = src.env("USERNAME")
	{ facts.insert("username".to_string(), user.into()); }

	let (major, minor) = src.os_version();
	facts.insert("os_version".to_string(),
			format!("{major}.{minor}").into());
	facts.insert("os_vers_major".to_string(), (major as i64).into());
	facts.insert("os_vers_minor".to_string(), (minor as i64).into());
	facts.insert("os_build_number".to_string(), src.os_build_number().into());

	facts.insert("machine_type".to_string(), src.machine_type().into());
	facts.insert("serial_number".to_string(), src.serial_number().into());

	let usage = src.env("CIMIAN_ENROLLED_USAGE").unwrap_or_else(|| "general".to_string());
	let area  = src.env("CIMIAN_ENROLLED_AREA").unwrap_or_else(|| "default".to_string());
	let room  = src.env("CIMIAN_ENROLLED_ROOM").unwrap_or_else(|| "none".to_string());
	facts.insert("enrolled_usage".to_string(), usage.into());
	facts.insert("enrolled_area".to_string(), area.into());
	facts.insert("enrolled_room".to_string(), room.into());

	facts
}


#[cfg(test)]
pub(crate) mod tests
{
	use super::*;

	/// A fixed fact source for tests; no env/registry/WMI involved.
	pub(crate) struct FakeFacts
	{
		pub(crate) hostname: String,
	}

	impl FactSource for FakeFacts
	{
		fn env(&self, key: &str) -> Option<String>
		{
			match key
			{
				"PROCESSOR_ARCHITECTURE" => Some("AMD64".to_string()),
				"USERDOMAIN" => Some("CONTOSO".to_string()),
				"USERNAME" => Some("svc".to_string()),
				_ => None,
			}
		}
		fn hostname(&self) -> String { self.hostname.clone() }
		fn os_version(&self) -> (u32, u32) { (10, 0) }
		fn os_build_number(&self) -> String { "22631".to_string() }
		fn machine_type(&self) -> String { "desktop".to_string() }
		fn serial_number(&self) -> String { "TESTSERIAL".to_string() }
	}

	#[test]
	fn arch_normalization()
	{
		assert_eq!(normalize_arch("AMD64"), "x64");
		assert_eq!(normalize_arch("x86_64"), "x64");
		assert_eq!(normalize_arch("X86"), "x86");
		assert_eq!(normalize_arch("386"), "x86");
		assert_eq!(normalize_arch("ARM64"), "arm64");
	}

	#[test]
	fn gather_basic()
	{
		let src = FakeFacts { hostname: "DESK-42".to_string() };
		let facts = gather(&src);

		assert_eq!(facts["hostname"].as_compare_str(), "DESK-42");
		assert_eq!(facts["arch"].as_compare_str(), "x64");
		assert_eq!(facts["domain"].as_compare_str(), "CONTOSO");
		assert_eq!(facts["os_version"].as_compare_str(), "10.0");
	}
}
