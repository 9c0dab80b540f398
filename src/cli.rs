//! CLI surface (§6.4): clap derive, same shape as the teacher's
//! `command/line.rs` (a top `Args` struct with global flags plus a run
//! mode selector).
use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum RunMode { Auto, Checkonly, Installonly, Custom }

#[derive(Debug, Parser)]
#[command(name = "cimian-update", version, about = "Managed software update client")]
pub(crate) struct Args
{
	/// Print version and exit.
	#[arg(long)]
	pub(crate) version: bool,

	/// Print the resolved configuration and exit.
	#[arg(long)]
	pub(crate) show_config: bool,

	/// Evaluate state only; do not fetch or install anything.
	#[arg(long)]
	pub(crate) checkonly: bool,

	/// Only install items already present in the local cache.
	#[arg(long)]
	pub(crate) installonly: bool,

	/// Run unattended, honoring the idle-time gate (§4.10 step 7).
	#[arg(long)]
	pub(crate) auto: bool,

	/// Increase verbosity; repeatable (-v, -vv, -vvv).
	#[arg(short, action = clap::ArgAction::Count)]
	pub(crate) v: u8,
}

impl Args
{
	pub(crate) fn run_mode(&self) -> RunMode
	{
		if self.auto { RunMode::Auto }
		else if self.checkonly { RunMode::Checkonly }
		else if self.installonly { RunMode::Installonly }
		else { RunMode::Custom }
	}
}

/// Process exit codes (§6.4).
pub(crate) mod exit_code
{
	pub(crate) const SUCCESS: i32 = 0;
	pub(crate) const ERROR: i32 = 1;
	pub(crate) const USAGE: i32 = 2;
}


#[cfg(test)]
mod tests
{
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn cli_parses()
	{
		let args = Args::parse_from(["cimian-update", "--auto", "-vv"]);
		assert!(args.auto);
		assert_eq!(args.v, 2);
		assert_eq!(args.run_mode(), RunMode::Auto);
	}

	#[test]
	fn debug_assert_valid()
	{
		Args::command().debug_assert();
	}

	#[test]
	fn default_mode_is_custom()
	{
		let args = Args::parse_from(["cimian-update"]);
		assert_eq!(args.run_mode(), RunMode::Custom);
	}
}
