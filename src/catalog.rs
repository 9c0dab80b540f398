//! Catalog document shape (§3): per-package authored metadata that the
//! resolver (C5) joins against manifest references to build work items.
use crate::hash::{Md5Hash, Sha256Hash};


/// One of the six installer payload formats the dispatcher (C8) knows
/// how to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub(crate) enum InstallerType
{
	Msi,
	Exe,
	Msix,
	Ps1,
	Nupkg,
	Bat,
}

/// Location, integrity hash, type and size of an installer or
/// uninstaller payload.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct InstallerDescriptor
{
	pub(crate) location: String,
	pub(crate) hash: Sha256Hash,
	#[serde(rename = "type")]
	pub(crate) kind: InstallerType,
	pub(crate) size: u64,

	#[serde(default)]
	pub(crate) arguments: Vec<String>,
}

/// A per-file entry in a catalog entry's `installs` array (§3, §4.6).
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct InstallCheckFile
{
	#[serde(rename = "type")]
	pub(crate) kind: String,
	pub(crate) path: String,
	pub(crate) md5checksum: Option<Md5Hash>,
	pub(crate) version: Option<String>,
}

/// Authored record for one package name (§3).
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct CatalogEntry
{
	pub(crate) name: String,
	pub(crate) version: String,

	#[serde(default)]
	pub(crate) supported_architectures: Vec<String>,

	pub(crate) installer_item: InstallerDescriptor,
	pub(crate) uninstaller_item: Option<InstallerDescriptor>,

	#[serde(default)]
	pub(crate) on_demand: bool,

	pub(crate) installcheck_script: Option<String>,
	pub(crate) preinstall_script: Option<String>,
	pub(crate) postinstall_script: Option<String>,
	pub(crate) preuninstall_script: Option<String>,
	pub(crate) postuninstall_script: Option<String>,
	pub(crate) uninstallcheck_script: Option<String>,

	#[serde(default)]
	pub(crate) blocking_applications: Vec<String>,

	#[serde(default)]
	pub(crate) installs: Vec<InstallCheckFile>,
}

/// The `{items: [...]}` shape of a catalog file (§4.5 step 4).
#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Catalog
{
	#[serde(default)]
	pub(crate) items: Vec<CatalogEntry>,
}

impl Catalog
{
	pub(crate) fn parse(bytes: &[u8]) -> Result<Self, serde_yaml::Error>
	{ serde_yaml::from_slice(bytes) }
}


#[cfg(test)]
mod tests
{
	use super::*;

	fn sample_catalog() -> &'static [u8]
	{
		br#"
items:
  - name: Firefox
    version: "128.0.3"
    supported_architectures: [x64]
    installer_item:
      location: "apps/firefox/Firefox-128.0.3.msi"
      hash: "00000000000000000000000000000000000000000000000000000000000000aa"
      type: msi
      size: 55000000
"#
	}

	#[test]
	fn parses_minimal_entry()
	{
		let cat = Catalog::parse(sample_catalog()).unwrap();
		assert_eq!(cat.items.len(), 1);
		let e = &cat.items[0];
		assert_eq!(e.name, "Firefox");
		assert_eq!(e.installer_item.kind, InstallerType::Msi);
		assert!(!e.on_demand);
		assert!(e.installs.is_empty());
	}

	#[test]
	fn installer_type_roundtrips()
	{
		assert_eq!("msix".parse::<InstallerType>().unwrap(), InstallerType::Msix);
		assert_eq!(InstallerType::Nupkg.to_string(), "nupkg");
	}

	#[test]
	fn installs_array_parses()
	{
		let yaml = br#"
items:
  - name: Tool
    version: "1.0"
    installer_item:
      location: "apps/tool.exe"
      hash: "00000000000000000000000000000000000000000000000000000000000000aa"
      type: exe
      size: 1000
    installs:
      - type: file
        path: "C:\\Program Files\\Tool\\tool.exe"
        version: "1.0.0"
"#;
		let cat = Catalog::parse(yaml).unwrap();
		assert_eq!(cat.items[0].installs.len(), 1);
		assert_eq!(cat.items[0].installs[0].path, r"C:\Program Files\Tool\tool.exe");
	}
}
