//! Configuration (§6.1, §6.2): YAML file on disk, with a registry-backed
//! fallback and CLI-flag overrides layered on top. Grounded on the
//! teacher's `config.rs` load-then-overlay shape, generalized from its
//! custom `Key value` line format to YAML since that's the wire format
//! this spec's manifests and catalogs already use.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) enum LogLevel { Error, Warn, Info, Debug }

impl Default for LogLevel { fn default() -> Self { Self::Info } }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) enum CloudProvider { Aws, Azure, None }

impl Default for CloudProvider { fn default() -> Self { Self::None } }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) enum FailureAction { Continue, Abort, Warn }

impl Default for FailureAction { fn default() -> Self { Self::Continue } }

#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Config
{
	pub(crate) software_repo_url: String,
	pub(crate) client_identifier: String,

	#[serde(default = "default_cache_path")]
	pub(crate) cache_path: PathBuf,
	#[serde(default = "default_catalogs_path")]
	pub(crate) catalogs_path: PathBuf,
	pub(crate) repo_path: Option<PathBuf>,
	pub(crate) install_path: Option<PathBuf>,

	#[serde(default)]
	pub(crate) log_level: LogLevel,
	#[serde(default)]
	pub(crate) verbose: bool,
	#[serde(default)]
	pub(crate) debug: bool,
	#[serde(default)]
	pub(crate) check_only: bool,

	#[serde(default = "default_arch")]
	pub(crate) default_arch: String,
	#[serde(default = "default_catalog")]
	pub(crate) default_catalog: String,

	#[serde(default)]
	pub(crate) cloud_provider: CloudProvider,
	pub(crate) cloud_bucket: Option<String>,

	#[serde(default)]
	pub(crate) force_basic_auth: bool,

	pub(crate) local_only_manifest: Option<String>,
	#[serde(default)]
	pub(crate) local_manifests: Vec<String>,

	#[serde(default)]
	pub(crate) no_preflight: bool,
	#[serde(default)]
	pub(crate) preflight_failure_action: FailureAction,
	#[serde(default)]
	pub(crate) postflight_failure_action: FailureAction,

	#[serde(default = "default_installer_timeout")]
	pub(crate) installer_timeout_minutes: u32,

	#[serde(default)]
	pub(crate) catalogs: Vec<String>,
}

fn default_cache_path() -> PathBuf
{ PathBuf::from(r"C:\ProgramData\ManagedInstalls\Cache") }
fn default_catalogs_path() -> PathBuf
{ PathBuf::from(r"C:\ProgramData\ManagedInstalls\catalogs") }
fn default_arch() -> String { "x64,arm64".to_string() }
fn default_catalog() -> String { "testing".to_string() }
fn default_installer_timeout() -> u32 { 15 }

pub(crate) const CONFIG_FILE_PATH: &str = r"C:\ProgramData\ManagedInstalls\Config.yaml";
pub(crate) const REGISTRY_CONFIG_KEY: &str = r"SOFTWARE\Cimian\Config";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigErr
{
	#[error("reading config file '{0}': {1}")]
	Read(String, std::io::Error),
	#[error("parsing config file '{0}': {1}")]
	Parse(String, serde_yaml::Error),
	#[error("reading registry config: {0}")]
	Registry(String),
	#[error("config is missing required key '{0}'")]
	MissingRequired(&'static str),
}

impl Config
{
	/// Load from the YAML file if present, else fall back to the
	/// registry (§6.1/§6.2). Mirrors the teacher's `load_config_file`
	/// → `load` split.
	pub(crate) fn load(path: &Path) -> Result<Self, ConfigErr>
	{
		if path.exists()
		{
			let bytes = std::fs::read(path)
					.map_err(|e| ConfigErr::Read(path.display().to_string(), e))?;
			let cfg: Config = serde_yaml::from_slice(&bytes)
					.map_err(|e| ConfigErr::Parse(path.display().to_string(), e))?;
			return Ok(cfg);
		}

		Self::load_from_registry()
	}

	#[cfg(windows)]
	fn load_from_registry() -> Result<Self, ConfigErr>
	{
		use winreg::enums::HKEY_LOCAL_MACHINE;
		use winreg::RegKey;

		let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
		let key = hklm.open_subkey(REGISTRY_CONFIG_KEY)
				.map_err(|e| ConfigErr::Registry(e.to_string()))?;

		let get_str = |name: &str| -> Option<String> { key.get_value(name).ok() };
		let get_bool = |name: &str| -> bool
		{
			get_str(name).map(|s| matches!(s.as_str(), "true" | "1"))
					.or_else(|| key.get_value::<u32, _>(name).ok().map(|v| v != 0))
					.unwrap_or(false)
		};
		let get_list = |name: &str| -> Vec<String>
		{
			key.get_value::<Vec<String>, _>(name).ok()
					.or_else(|| get_str(name).map(|s|
							s.split(',').map(|p| p.trim().to_string()).collect()))
					.unwrap_or_default()
		};

		Ok(Config {
			software_repo_url: get_str("SoftwareRepoURL")
					.ok_or(ConfigErr::MissingRequired("SoftwareRepoURL"))?,
			client_identifier: get_str("ClientIdentifier")
					.ok_or(ConfigErr::MissingRequired("ClientIdentifier"))?,
			cache_path: get_str("CachePath").map(PathBuf::from)
					.unwrap_or_else(default_cache_path),
			catalogs_path: get_str("CatalogsPath").map(PathBuf::from)
					.unwrap_or_else(default_catalogs_path),
			repo_path: get_str("RepoPath").map(PathBuf::from),
			install_path: get_str("InstallPath").map(PathBuf::from),
			log_level: get_str("LogLevel").and_then(|s| s.parse().ok()).unwrap_or_default(),
			verbose: get_bool("Verbose"),
			debug: get_bool("Debug"),
			check_only: get_bool("CheckOnly"),
			default_arch: get_str("DefaultArch").unwrap_or_else(default_arch),
			default_catalog: get_str("DefaultCatalog").unwrap_or_else(default_catalog),
			cloud_provider: get_str("CloudProvider").and_then(|s| s.parse().ok())
					.unwrap_or_default(),
			cloud_bucket: get_str("CloudBucket"),
			force_basic_auth: get_bool("ForceBasicAuth"),
			local_only_manifest: get_str("LocalOnlyManifest"),
			local_manifests: get_list("LocalManifests"),
			no_preflight: get_bool("NoPreflight"),
			preflight_failure_action: get_str("PreflightFailureAction")
					.and_then(|s| s.parse().ok()).unwrap_or_default(),
			postflight_failure_action: get_str("PostflightFailureAction")
					.and_then(|s| s.parse().ok()).unwrap_or_default(),
			installer_timeout_minutes: get_str("InstallerTimeoutMinutes")
					.and_then(|s| s.parse().ok())
					.unwrap_or_else(default_installer_timeout),
			catalogs: get_list("Catalogs"),
		})
	}

	#[cfg(not(windows))]
	fn load_from_registry() -> Result<Self, ConfigErr>
	{
		Err(ConfigErr::Registry("registry fallback is only available on Windows".to_string()))
	}

	/// The `…\ManagedInstalls` root (§6.6): sessions live under
	/// `<root>\Logs`, report tables under `<root>\reports`, both
	/// siblings of `CachePath` rather than nested under it.
	pub(crate) fn managed_root(&self) -> PathBuf
	{
		self.cache_path.parent()
				.map(Path::to_path_buf)
				.unwrap_or_else(|| self.cache_path.clone())
	}

	/// Apply CLI-flag overrides (§6.4), the last layer, same order the
	/// teacher's `or!` macro overlays command-line args atop file
	/// config.
	pub(crate) fn apply_cli_overrides(&mut self, checkonly: bool, verbosity: u8)
	{
		if checkonly { self.check_only = true; }
		match verbosity
		{
			0 => {},
			1 => self.verbose = true,
			_ => { self.verbose = true; self.debug = true; },
		}
	}
}

/// The tiny subset of config exposed to `--show-config` (§6.4), kept
/// separate so secrets like `CloudBucket` credentials never leak into
/// it if they're later added.
pub(crate) fn redacted_view(cfg: &Config) -> HashMap<String, String>
{
	HashMap::from([
		("SoftwareRepoURL".to_string(), cfg.software_repo_url.clone()),
		("ClientIdentifier".to_string(), cfg.client_identifier.clone()),
		("CachePath".to_string(), cfg.cache_path.display().to_string()),
		("DefaultCatalog".to_string(), cfg.default_catalog.clone()),
		("LogLevel".to_string(), cfg.log_level.to_string()),
	])
}


#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn loads_minimal_yaml_with_defaults()
	{
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("Config.yaml");
		std::fs::write(&path, "SoftwareRepoURL: https://repo.example\n\
				ClientIdentifier: site_default\n").unwrap();

		let cfg = Config::load(&path).unwrap();
		assert_eq!(cfg.software_repo_url, "https://repo.example");
		assert_eq!(cfg.default_catalog, "testing");
		assert_eq!(cfg.installer_timeout_minutes, 15);
		assert!(!cfg.force_basic_auth);
	}

	#[test]
	fn cli_overrides_layer_on_top()
	{
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("Config.yaml");
		std::fs::write(&path, "SoftwareRepoURL: https://repo.example\n\
				ClientIdentifier: site_default\n").unwrap();

		let mut cfg = Config::load(&path).unwrap();
		cfg.apply_cli_overrides(true, 2);
		assert!(cfg.check_only);
		assert!(cfg.verbose);
		assert!(cfg.debug);
	}

	#[test]
	fn managed_root_is_cache_path_parent()
	{
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("Config.yaml");
		std::fs::write(&path, format!("SoftwareRepoURL: https://repo.example\n\
				ClientIdentifier: site_default\n\
				CachePath: {}\n", dir.path().join("ManagedInstalls").join("Cache").display()))
				.unwrap();

		let cfg = Config::load(&path).unwrap();
		assert_eq!(cfg.managed_root(), dir.path().join("ManagedInstalls"));
	}

	#[test]
	fn missing_file_and_no_registry_is_an_error_on_non_windows()
	{
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("does-not-exist.yaml");
		let result = Config::load(&path);
		#[cfg(not(windows))]
		assert!(result.is_err());
		#[cfg(windows)]
		let _ = result;
	}
}
