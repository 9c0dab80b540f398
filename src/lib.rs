//! Cimian update client library: manifest/catalog resolution, state
//! evaluation, download, install, and session logging for a managed
//! Windows endpoint.
pub(crate) mod blocking;
pub(crate) mod cache;
pub(crate) mod catalog;
pub(crate) mod cli;
pub(crate) mod config;
pub(crate) mod facts;
pub(crate) mod fetch;
pub(crate) mod hash;
pub(crate) mod installer;
pub(crate) mod jobtimeout;
pub(crate) mod manifest;
pub(crate) mod orchestrator;
pub(crate) mod pool;
pub(crate) mod predicate;
pub(crate) mod resolver;
pub(crate) mod script;
pub(crate) mod session;
pub(crate) mod state_eval;
pub(crate) mod sysquery;

pub use cli::Args;

/// Entry point called from `main.rs`; kept here (rather than inline in
/// `main`) so it's reachable from integration-style tests in this crate
/// without spawning a subprocess.
pub fn run(args: Args) -> i32
{
	if args.version
	{
		println!("cimian-update {}", env!("CARGO_PKG_VERSION"));
		return cli::exit_code::SUCCESS;
	}

	let config_path = std::path::Path::new(config::CONFIG_FILE_PATH);

	if args.show_config
	{
		return match config::Config::load(config_path)
		{
			Ok(cfg) =>
			{
				let view = config::redacted_view(&cfg);
				for (k, v) in view
				{ println!("{k}: {v}"); }
				cli::exit_code::SUCCESS
			},
			Err(e) => { eprintln!("error: {e}"); cli::exit_code::ERROR },
		};
	}

	let mode = match args.run_mode()
	{
		cli::RunMode::Auto => orchestrator::RunMode::Auto,
		cli::RunMode::Checkonly => orchestrator::RunMode::CheckOnly,
		cli::RunMode::Installonly => orchestrator::RunMode::InstallOnly,
		cli::RunMode::Custom => orchestrator::RunMode::Custom,
	};

	orchestrator::run(config_path, mode, args.v)
}
