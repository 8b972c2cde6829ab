use clap::Parser;
use pdlcount::cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = cli::Args::parse();
    match cli::dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Config errors happen before logging is up, so report directly.
            eprintln!("pdlcount: {err:#}");
            ExitCode::FAILURE
        }
    }
}
