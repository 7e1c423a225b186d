mod cli;
mod config;
mod push;
mod run;

use anyhow::Result;

use crate::cli::Command;

fn main() -> Result<()> {
    let args = cli::parse();
    run::initialise_tracing();
    match args.command {
        Some(Command::Push(push_args)) => push::run(push_args),
        None => {
            run::run(args.run)?;
            std::process::exit(0)
        }
    }
}
