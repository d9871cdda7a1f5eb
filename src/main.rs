use std::process::ExitCode;

use clap::Parser;
use massive_passive::cli_app::{Cli, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("massive-passive: {err}");
            ExitCode::FAILURE
        }
    }
}
