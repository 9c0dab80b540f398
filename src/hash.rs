//! Content fingerprints: SHA-256 (payload integrity, §3) and MD5 (install
//! check comparisons against author-recorded hashes, §3 "Install check").
use std::ops::Deref;
use std::fmt;
use serde_with::{serde_as, hex::Hex};


/// A raw SHA-256 hash output.
///
/// SHA-256 gives you a 256 bit number, which you need 256 bits to store.
/// The sha2 crate hands it back as a `[u8; 32]`, and base16ct can dehex
/// into/out of that directly, so we just wrap it and call it good.
#[derive(Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde_as]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Sha256Hash(
	#[serde_as(as = "Hex")]
	[u8; 32]
);

impl Deref for Sha256Hash
{
	type Target = [u8; 32];
	fn deref(&self) -> &Self::Target { &self.0 }
}

impl fmt::Debug for Sha256Hash
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "Sha256Hash({})", self.to_hex()) }
}

impl fmt::Display for Sha256Hash
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "{}", self.to_hex()) }
}

impl std::str::FromStr for Sha256Hash
{
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err>
	{
		use anyhow::anyhow;

		let xlen = 64;
		let slen = s.len();
		if slen != xlen
		{
			let estr = anyhow!("Invalid hash length: {slen} should be \
					{xlen} for '{s}'");
			Err(estr)?;
		}

		let mut hout = Sha256Hash::default();
		base16ct::lower::decode(s, &mut hout.0)
				.map_err(|e| anyhow!("Invalid hex parsing: {e} trying '{s}'"))?;

		Ok(hout)
	}
}

impl From<[u8; 32]> for Sha256Hash
{
	fn from(buf: [u8; 32]) -> Self { Self(buf) }
}

impl Sha256Hash
{
	/// Lowercase hex rendering.  Used for the payload-cache mirror path
	/// (which is keyed on content hash in some server layouts) and for
	/// error messages.
	pub(crate) fn to_hex(&self) -> String
	{
		let mut buf = [0u8; 64];
		base16ct::lower::encode(&self.0, &mut buf)
				.expect("32 bytes always fits 64 hex chars");
		std::str::from_utf8(&buf).expect("hex is ASCII").to_string()
	}
}


/// A raw MD5 hash output, used only for comparing against the
/// author-recorded `md5checksum` on an install-check file entry (§3).
/// MD5 has no business being used for anything security-sensitive; it's
/// only here because catalog authors record it that way.
#[derive(Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde_as]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Md5Hash(
	#[serde_as(as = "Hex")]
	[u8; 16]
);

impl fmt::Debug for Md5Hash
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "Md5Hash({})", self.to_hex()) }
}

impl fmt::Display for Md5Hash
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "{}", self.to_hex()) }
}

impl std::str::FromStr for Md5Hash
{
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err>
	{
		use anyhow::anyhow;

		let xlen = 32;
		let slen = s.len();
		if slen != xlen
		{
			let estr = anyhow!("Invalid MD5 length: {slen} should be \
					{xlen} for '{s}'");
			Err(estr)?;
		}

		let mut hout = Md5Hash::default();
		base16ct::lower::decode(s, &mut hout.0)
				.map_err(|e| anyhow!("Invalid hex parsing: {e} trying '{s}'"))?;

		Ok(hout)
	}
}

impl Md5Hash
{
	pub(crate) fn to_hex(&self) -> String
	{
		let mut buf = [0u8; 32];
		base16ct::lower::encode(&self.0, &mut buf)
				.expect("16 bytes always fits 32 hex chars");
		std::str::from_utf8(&buf).expect("hex is ASCII").to_string()
	}
}


/*
 * Hashing utils
 */

/// Calculate the SHA-256 of something we can read from (a downloaded
/// file, a byte buffer wrapped in a Cursor, etc).
pub(crate) fn sha256_reader<T: std::io::Read>(rdr: &mut T)
		-> Result<Sha256Hash, std::io::Error>
{
	use sha2::{Sha256, Digest};

	let mut hasher = Sha256::new();
	std::io::copy(rdr, &mut hasher)?;
	let digest = hasher.finalize();
	Ok(Sha256Hash(digest.into()))
}

/// Calculate the SHA-256 of a file on disk.
pub(crate) fn sha256_file(file: &std::path::Path)
		-> Result<Sha256Hash, std::io::Error>
{
	let mut fh = std::fs::File::open(file)?;
	sha256_reader(&mut fh)
}

/// Calculate the MD5 of a file on disk, for install-check comparisons.
pub(crate) fn md5_file(file: &std::path::Path)
		-> Result<Md5Hash, std::io::Error>
{
	use md5::{Md5, Digest};

	let mut fh = std::fs::File::open(file)?;
	let mut hasher = Md5::new();
	std::io::copy(&mut fh, &mut hasher)?;
	let digest = hasher.finalize();
	Ok(Md5Hash(digest.into()))
}

/// Check the SHA-256 of a byte buffer against an expected hex string.
pub(crate) fn check_sha256(buf: &[u8], expect: &str, name: &str)
		-> Result<(), anyhow::Error>
{
	use std::io::Cursor;
	use anyhow::anyhow;

	let xhash: Sha256Hash = expect.parse()?;
	let khash = sha256_reader(&mut Cursor::new(buf))?;

	if khash != xhash
	{
		let es = anyhow!("Bad {name} hash: expected '{xhash}', got '{khash}'");
		return Err(es);
	}

	Ok(())
}


#[cfg(test)]
mod tests
{
	fn start_at_the_beginning() -> &'static str
	{ "Do, a deer, a female deer" }
	fn expect_at_the_beginning() -> &'static str
	{ "762e31fc5d92b2c6d7e5a9485cab35714f5e27457e252d0126663554280099fe" }

	#[test]
	fn sha256()
	{
		let buf = start_at_the_beginning().as_bytes();
		let expect = expect_at_the_beginning();
		super::check_sha256(buf, expect, "Julie Andrews").unwrap();
	}

	#[test]
	fn sha256_roundtrip()
	{
		let h: super::Sha256Hash = expect_at_the_beginning().parse().unwrap();
		assert_eq!(h.to_hex(), expect_at_the_beginning());
	}

	#[test]
	fn md5_roundtrip()
	{
		let expect = "d41d8cd98f00b204e9800998ecf8427e";
		let h: super::Md5Hash = expect.parse().unwrap();
		assert_eq!(h.to_hex(), expect);
	}

	#[test]
	fn bad_hash_length()
	{
		let e: Result<super::Sha256Hash, _> = "abc".parse();
		assert!(e.is_err());
	}
}
