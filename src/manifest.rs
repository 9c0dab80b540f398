//! Manifest document shape (§3): the server-published YAML a client
//! identifier resolves to the root of.
use crate::predicate::ConditionalItem;


/// A named manifest document. Mirrors `server/…/manifests/<name>.yaml`.
#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Manifest
{
	#[serde(default)] pub(crate) catalogs: Vec<String>,

	#[serde(default)] pub(crate) managed_installs: Vec<String>,
	#[serde(default)] pub(crate) managed_updates: Vec<String>,
	#[serde(default)] pub(crate) managed_uninstalls: Vec<String>,
	#[serde(default)] pub(crate) optional_installs: Vec<String>,
	#[serde(default)] pub(crate) included_manifests: Vec<String>,

	#[serde(default)] pub(crate) conditional_items: Vec<ConditionalItem>,
}

impl Manifest
{
	pub(crate) fn parse(bytes: &[u8]) -> Result<Self, serde_yaml::Error>
	{ serde_yaml::from_slice(bytes) }
}


#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn parses_minimal_manifest()
	{
		let yaml = b"
managed_installs:
  - Firefox
  - 7-Zip
catalogs:
  - production
";
		let m = Manifest::parse(yaml).unwrap();
		assert_eq!(m.managed_installs, vec!["Firefox", "7-Zip"]);
		assert_eq!(m.catalogs, vec!["production"]);
		assert!(m.conditional_items.is_empty());
	}

	#[test]
	fn parses_nested_conditional_items()
	{
		let yaml = b"
managed_installs:
  - BaseAgent
conditional_items:
  - condition: \"arch == x64\"
    managed_installs:
      - 64BitTool
";
		let m = Manifest::parse(yaml).unwrap();
		assert_eq!(m.conditional_items.len(), 1);
		assert_eq!(m.conditional_items[0].managed_installs, vec!["64BitTool"]);
	}

	#[test]
	fn empty_manifest_defaults()
	{
		let m = Manifest::parse(b"{}").unwrap();
		assert!(m.managed_installs.is_empty());
		assert!(m.included_manifests.is_empty());
	}
}
