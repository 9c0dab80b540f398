use clap::Parser;
use cimian_update::Args;

fn main()
{
	let args = Args::parse();
	std::process::exit(cimian_update::run(args));
}
