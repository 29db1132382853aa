//! epm CLI — deploy and test smart-contract packages.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "epm",
    version,
    about = "Smart-contract package manager — package definitions, cached compiles, state diffs"
)]
struct Cli {
    #[command(subcommand)]
    command: epm::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = epm::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
