//! Cache (C2): the three on-disk roots (manifests/catalogs/payload) and
//! the scan-and-clean pass that repairs them between runs.
use std::path::{Path, PathBuf};

use crate::pool::Pool;

#[derive(Debug, Clone)]
pub(crate) struct Cache
{
	pub(crate) manifests_root: PathBuf,
	pub(crate) catalogs_root: PathBuf,
	pub(crate) payload_root: PathBuf,
}

impl Cache
{
	pub(crate) fn new(base: &Path) -> Self
	{
		Self {
			manifests_root: base.join("manifests"),
			catalogs_root: base.join("catalogs"),
			payload_root: base.join("pkgs"),
		}
	}

	/// Create all three roots with `rwxr-xr-x` (§4.2). On Windows,
	/// `create_dir_all` alone is the meaningful operation — Unix
	/// permission bits are a no-op there, matched by `set_permissions`
	/// being a cfg(unix)-only path.
	pub(crate) fn ensure_dirs(&self) -> std::io::Result<()>
	{
		for root in [&self.manifests_root, &self.catalogs_root, &self.payload_root]
		{
			std::fs::create_dir_all(root)?;
			#[cfg(unix)]
			{
				use std::os::unix::fs::PermissionsExt;
				let perms = std::fs::Permissions::from_mode(0o755);
				std::fs::set_permissions(root, perms)?;
			}
		}
		Ok(())
	}

	/// Scan-and-clean (§4.2): remove 0-byte files, `.downloading` temp
	/// files, and `.nupkg` files failing the ZIP magic-number check.
	/// Returns `(scanned, removed)`.
	pub(crate) fn scan_and_clean(&self) -> (usize, usize)
	{
		let mut files = Vec::new();
		for root in [&self.manifests_root, &self.catalogs_root, &self.payload_root]
		{ collect_files(root, &mut files); }

		let scanned = files.len();
		let scanner = Scanner;
		let removed = scanner.run(files, 4).into_iter().filter(|removed| *removed).count();

		(scanned, removed)
	}
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>)
{
	let Ok(entries) = std::fs::read_dir(dir) else { return; };
	for entry in entries.flatten()
	{
		let path = entry.path();
		if path.is_dir() { collect_files(&path, out); }
		else { out.push(path); }
	}
}

struct Scanner;

impl Pool for Scanner
{
	type Item = PathBuf;
	type Output = bool;

	fn work(&self, path: PathBuf) -> bool
	{
		let Ok(meta) = std::fs::metadata(&path) else { return false; };

		if meta.len() == 0
		{ return std::fs::remove_file(&path).is_ok(); }

		if path.extension().map(|e| e == "downloading").unwrap_or(false)
		{ return std::fs::remove_file(&path).is_ok(); }

		if path.extension().map(|e| e.eq_ignore_ascii_case("nupkg")).unwrap_or(false)
				&& !has_zip_magic(&path)
		{ return std::fs::remove_file(&path).is_ok(); }

		false
	}
}

fn has_zip_magic(path: &Path) -> bool
{
	use std::io::Read;
	let Ok(mut f) = std::fs::File::open(path) else { return false; };
	let mut buf = [0u8; 4];
	if f.read_exact(&mut buf).is_err() { return false; }
	buf == [0x50, 0x4B, 0x03, 0x04]
}
